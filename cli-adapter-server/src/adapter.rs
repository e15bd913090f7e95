//! Serves one request of a route by running its executable.
//!
//! A request passes through these steps:
//! 1. Resolve the parameter table, arguments and response headers.
//!    Nothing is written or spawned if a placeholder is unknown.
//! 2. Stage the body in the input file if `inputToFile` is set.
//! 3. Run the executable, or skip it for routes which only serve their output file.
//! 4. Answer with stdout or the content of the output file.
//! 5. Remove the staged files, whatever happened before.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use cli_adapter_api::api::CliOptions;

use crate::cleanup::InFlight;
use crate::error::AdapterError;
use crate::params::{map_args, map_headers, ParameterTable, RequestData};
use crate::process::{Executor, Invocation};

/// Server wide settings the adapter needs.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Where processes run and staged files are created.
    pub work_dir: PathBuf,
    /// Staged files of running requests, shared with the sweeper.
    pub in_flight: InFlight,
    /// Largest request body accepted, in bytes.
    pub body_limit: usize,
}

/// The request data, owned so the adapter can continue on its own task.
#[derive(Debug, Default)]
pub struct AdapterRequest {
    pub headers: HeaderMap,
    pub query: Vec<(String, String)>,
    pub path: Vec<(String, String)>,
    pub body: Bytes,
}

impl AdapterRequest {
    fn data(&self) -> RequestData<'_> {
        RequestData {
            headers: &self.headers,
            query: &self.query,
            path: &self.path,
            body: &self.body,
        }
    }
}

/// Files created for a single request, removed by [`StagedFiles::remove`].
///
/// Paths are registered as in flight before anything creates them
/// and released once they are gone.
#[derive(Debug)]
struct StagedFiles {
    in_flight: InFlight,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
}

impl StagedFiles {
    fn new(in_flight: InFlight) -> Self {
        StagedFiles {
            in_flight,
            input: None,
            output: None,
        }
    }

    fn stage_input(&mut self, path: PathBuf) {
        self.in_flight.register(&path);
        self.input = Some(path);
    }

    fn stage_output(&mut self, path: PathBuf) {
        self.in_flight.register(&path);
        self.output = Some(path);
    }

    async fn remove(self, id: u64) {
        for path in [self.input, self.output].into_iter().flatten() {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => log::trace!(id, path:debug; "removed staged file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => log::warn!(id, path:debug; "failed to remove staged file: {e}"),
            }
            self.in_flight.release(&path);
        }
    }
}

/// Answers a request, mapping every failure to a generic 500.
///
/// The work continues on a separate task, so a client hanging up
/// doesn't prevent the cleanup of staged files.
pub async fn serve<E: Executor>(
    options: Arc<CliOptions>,
    settings: Arc<Settings>,
    executor: E,
    request: AdapterRequest,
) -> Response {
    let id = fastrand::u64(..);
    log::info!(id; "received request");

    let task = tokio::spawn(async move { adapt(id, &options, &settings, &executor, request).await });
    match task.await.map_err(AdapterError::from).and_then(|result| result) {
        Ok(response) => {
            log::debug!(id; "request succeeded");
            response
        }
        Err(e) => {
            log::error!(id; "error during execution: {e}");
            e.into_response()
        }
    }
}

async fn adapt<E: Executor>(
    id: u64,
    options: &CliOptions,
    settings: &Settings,
    executor: &E,
    request: AdapterRequest,
) -> Result<Response, AdapterError> {
    let params = ParameterTable::resolve(id, options, request.data());
    let headers = response_headers(&map_headers(&options.headers, &params)?)?;
    let args = map_args(&options.args, &params)?;
    log::debug!(id; "arguments: {args:?}");

    let mut staged = StagedFiles::new(settings.in_flight.clone());
    let result = produce(
        id,
        options,
        settings,
        executor,
        &params,
        args,
        request.body,
        &mut staged,
    )
    .await;
    staged.remove(id).await;

    let mut response = Response::new(Body::from(result?));
    *response.headers_mut() = headers;
    Ok(response)
}

/// Runs the route and returns the response body.
#[allow(clippy::too_many_arguments)]
async fn produce<E: Executor>(
    id: u64,
    options: &CliOptions,
    settings: &Settings,
    executor: &E,
    params: &ParameterTable,
    args: Vec<String>,
    body: Bytes,
    staged: &mut StagedFiles,
) -> Result<Vec<u8>, AdapterError> {
    if options.executable.is_none() {
        if !options.args.is_empty() {
            return Err(AdapterError::Inconsistent(
                "Inconsistent: Arguments given but not executable",
            ));
        }
        if options.output_file_name.is_none() || options.output_from_file == Some(false) {
            return Err(AdapterError::Inconsistent(
                "x-cli information inconsistent: nothing to execute or serve",
            ));
        }
    }

    let stdin = if options.input_to_file {
        let path = settings.work_dir.join(&params.input_file);
        staged.stage_input(path.clone());
        log::debug!(id, path:debug; "staging request body");
        tokio::fs::write(&path, &body)
            .await
            .map_err(|e| AdapterError::file(&path, e))?;
        None
    } else {
        Some(body.to_vec())
    };

    let output = settings.work_dir.join(&params.output_file);
    if let Some(executable) = &options.executable {
        let output_from_file = options.output_from_file == Some(true);
        if output_from_file {
            staged.stage_output(output.clone());
        }
        let stdout = executor
            .execute(Invocation {
                id,
                executable: executable.clone(),
                args,
                stdin,
                current_dir: settings.work_dir.clone(),
                shell: options.shell,
            })
            .await?;
        if !output_from_file {
            return Ok(stdout);
        }
    }

    log::debug!(id, path:debug = output; "reading response from file");
    read_file(&output).await
}

async fn read_file(path: &Path) -> Result<Vec<u8>, AdapterError> {
    tokio::fs::read(path)
        .await
        .map_err(|e| AdapterError::file(path, e))
}

fn response_headers(mapped: &[(String, String)]) -> Result<HeaderMap, AdapterError> {
    let mut headers = HeaderMap::with_capacity(mapped.len());
    for (name, value) in mapped {
        let invalid = || AdapterError::InvalidHeader {
            name: name.clone(),
            value: value.clone(),
        };
        let header_name = HeaderName::try_from(name.as_str()).map_err(|_| invalid())?;
        let header_value = HeaderValue::try_from(value.as_str()).map_err(|_| invalid())?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
