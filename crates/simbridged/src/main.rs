//! simbridged - conversion and analysis server
//!
//! Configuration comes from flags or `SIMBRIDGE_*` environment variables.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use simbridge_core::{Dispatcher, PipelineArgs};
use simbridged::{router, AppState, DEFAULT_BODY_LIMIT};
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "simbridged")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP server for model conversion and simulation", long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "SIMBRIDGE_BIND", default_value = "0.0.0.0:4000")]
    bind: SocketAddr,

    #[command(flatten)]
    pipeline: PipelineArgs,

    /// Maximum request body in bytes
    #[arg(long, env = "SIMBRIDGE_BODY_LIMIT", default_value_t = DEFAULT_BODY_LIMIT)]
    body_limit: usize,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    simbridge_core::init_tracing(args.json, level);

    let config = args.pipeline.pipeline_config();
    tokio::fs::create_dir_all(&config.work_root)
        .await
        .with_context(|| format!("Failed to create {}", config.work_root.display()))?;
    info!(work_root = %config.work_root.display(), engine = %config.engine.program, "configured");

    let app = router(
        AppState::new(Dispatcher::with_process_runner(config)),
        args.body_limit,
    );

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("Failed to bind {}", args.bind))?;
    info!(addr = %args.bind, "simbridged listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("simbridged stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_args_build_jar_invocations() {
        let args = Args::parse_from([
            "simbridged",
            "--analysis-jar",
            "/opt/analysis.jar",
            "--engine-timeout-secs",
            "0",
            "--work-root",
            "/var/simbridge",
        ]);
        let config = args.pipeline.pipeline_config();
        assert_eq!(config.engine.analysis_args, vec!["-jar", "/opt/analysis.jar"]);
        assert_eq!(config.engine.timeout(), None);
        assert_eq!(config.work_root, PathBuf::from("/var/simbridge"));
        assert_eq!(args.bind.port(), 4000);
    }

    #[test]
    fn test_args_expose_conversion_defaults() {
        let args = Args::parse_from(["simbridged", "--uri-prefix", "http://lab.example/"]);
        let engine = args.pipeline.engine_config();
        assert_eq!(engine.uri_prefix, "http://lab.example/");
        assert_eq!(engine.repository, simbridge_core::config::DEFAULT_REPOSITORY);
    }
}
