use std::num::NonZeroU16;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueHint};
use cli_adapter_api::api::ServiceDescription;
use log::LevelFilter;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::adapter::Settings;
use crate::cleanup::InFlight;
use crate::error::StartupError;
use crate::process::ProcessExecutor;

mod adapter;
mod cleanup;
mod error;
mod params;
mod process;
mod routes;

#[tokio::main(flavor = "current_thread")] // single-threaded, requests interleave on one event loop
async fn main() -> Result<(), StartupError> {
    env_logger::builder()
        .filter_level(LevelFilter::Info)
        .filter(Some("tower_http"), LevelFilter::Debug)
        .filter(Some("cli_adapter_server"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let CliArgs {
        spec,
        host,
        port,
        work_dir,
        cors,
        sweep_after,
        body_limit,
    } = CliArgs::parse();

    log::info!(
        version = env!("CARGO_PKG_VERSION"),
        spec:debug;
        "Initializing server"
    );

    let raw = tokio::fs::read(&spec)
        .await
        .map_err(|source| StartupError::Read {
            path: spec.clone(),
            source,
        })?;
    let document: serde_json::Value =
        serde_json::from_slice(&raw).map_err(|source| StartupError::Parse {
            path: spec.clone(),
            source,
        })?;
    let description: ServiceDescription =
        serde_json::from_value(document.clone()).map_err(|source| StartupError::Parse {
            path: spec.clone(),
            source,
        })?;
    let declared = description.routes()?;
    log::info!(routes = declared.len(); "service description is valid");

    // Create the working directory for processes and staged files
    if !work_dir.exists() {
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|source| StartupError::WorkDir {
                path: work_dir.clone(),
                source,
            })?;
    }
    let in_flight = InFlight::default();
    if let Some(secs) = sweep_after {
        log::info!(secs, work_dir:debug; "sweeping stale staged files");
        cleanup::start_sweep_task(
            work_dir.clone(),
            Duration::from_secs(secs),
            in_flight.clone(),
        );
    }

    log::info!(body_limit; "limiting request bodies");
    let settings = Arc::new(Settings {
        work_dir,
        in_flight,
        body_limit,
    });
    let mut router = routes::routes(
        description.base_path.as_deref(),
        declared,
        document,
        settings,
        ProcessExecutor,
    )
    .layer(TraceLayer::new_for_http());
    if cors {
        log::info!("allowing cross origin requests");
        router = router.layer(CorsLayer::permissive());
    }

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!(
        addr:display = host,
        port = port;
        "listening to TCP"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Makes a command-line tool available as a RESTful web service
/// using the provided OpenAPI 2.0 (fka Swagger) service description.
#[derive(Parser)]
#[command(version, about)]
struct CliArgs {
    /// Path to the JSON service description.
    #[arg(
        value_name = "PATH",
        value_hint = ValueHint::FilePath,
        env = "CLI_ADAPTER_SPEC",
    )]
    spec: PathBuf,
    /// The host address to listen on.
    #[arg(
        short = 'i',
        long = "ip",
        visible_alias = "host",
        value_name = "IP",
        value_hint = ValueHint::Hostname,
        default_value = "0.0.0.0",
        env = "CLI_ADAPTER_HOST",
    )]
    host: String,
    /// The port to listen on.
    #[arg(
        short,
        long,
        value_name = "PORT",
        value_hint = ValueHint::Other,
        default_value = "80",
        env = "CLI_ADAPTER_PORT",
    )]
    port: NonZeroU16,
    /// Directory the tools run in and staged files are created in.
    #[arg(
        short,
        long,
        value_name = "DIR",
        value_hint = ValueHint::DirPath,
        default_value = ".",
        env = "CLI_ADAPTER_WORK_DIR",
    )]
    work_dir: PathBuf,
    /// Allow cross origin requests from any origin.
    #[arg(long, env = "CLI_ADAPTER_CORS")]
    cors: bool,
    /// Periodically delete generated staging files older than this many seconds.
    #[arg(
        long,
        value_name = "SECS",
        value_parser = clap::value_parser!(u64).range(1..),
        env = "CLI_ADAPTER_SWEEP_AFTER",
    )]
    sweep_after: Option<u64>,
    /// Reject request bodies larger than this many bytes.
    #[arg(
        long,
        value_name = "BYTES",
        default_value = "2097152",
        env = "CLI_ADAPTER_BODY_LIMIT",
    )]
    body_limit: usize,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT (ctrl+c) handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => log::info!("received SIGINT (ctrl+c), shutting down"),
        () = terminate => log::info!("received SIGTERM, shutting down"),
    }
}
