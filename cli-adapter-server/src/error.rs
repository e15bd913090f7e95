use std::path::PathBuf;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cli_adapter_api::validate::ConfigError;

use crate::params::UnknownParameters;
use crate::process::ProcessError;

/// Everything that can go wrong while serving one request.
///
/// All variants answer with the same generic 500, details only go to the log.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error(transparent)]
    UnknownParameters(#[from] UnknownParameters),
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("file {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid response header {name:?}: {value:?}")]
    InvalidHeader { name: String, value: String },
    /// The route's options can't be served as given.
    #[error("{0}")]
    Inconsistent(&'static str),
    #[error("request task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AdapterError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AdapterError::File {
            path: path.into(),
            source,
        }
    }
}

impl IntoResponse for AdapterError {
    fn into_response(self) -> Response {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let message = status.canonical_reason().unwrap_or("Internal Server Error");
        (status, message).into_response()
    }
}

/// Problems preventing the server from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to read service description {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse service description {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to create working directory {path:?}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
