//! simbridge - run conversions and analyses without the server
//!
//! ## Commands
//!
//! - `analyze`: simulate a model (converting genetic designs first)
//! - `convert`: convert a genetic design to model-exchange files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use simbridge_core::{AnalyzeRequest, ConvertRequest, Dispatcher, PipelineArgs, PipelineOutput};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "simbridge")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Convert and simulate biological models", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a model and write the results archive
    Analyze {
        /// SBML, SBOL or OMEX input
        input: PathBuf,

        /// Environment archive that may carry a SED-ML descriptor
        #[arg(short, long)]
        environment: Option<PathBuf>,

        /// Engine option as key=value (e.g. runs=10), repeatable
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Where to write the results
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Convert a genetic design and write the model (or COMBINE archive)
    Convert {
        /// SBOL input
        sbol: PathBuf,

        /// Converter option as key=value (e.g. topModelId=Circuit), repeatable
        #[arg(short, long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Where to write the converted model
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got `{raw}`")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    simbridge_core::init_tracing(cli.json, level);

    let dispatcher = Dispatcher::with_process_runner(cli.pipeline.pipeline_config());

    match cli.command {
        Commands::Analyze {
            input,
            environment,
            params,
            output,
        } => cmd_analyze(&dispatcher, input, environment, params, &output).await,
        Commands::Convert {
            sbol,
            params,
            output,
        } => cmd_convert(&dispatcher, sbol, params, &output).await,
    }
}

async fn cmd_analyze(
    dispatcher: &Dispatcher,
    input: PathBuf,
    environment: Option<PathBuf>,
    params: Vec<(String, String)>,
    output: &Path,
) -> Result<()> {
    let request = AnalyzeRequest {
        input,
        environment,
        fields: into_fields(params),
    };
    let result = dispatcher.analyze(request).await.context("Analysis failed")?;
    write_output(result, output).await
}

async fn cmd_convert(
    dispatcher: &Dispatcher,
    sbol: PathBuf,
    params: Vec<(String, String)>,
    output: &Path,
) -> Result<()> {
    let request = ConvertRequest {
        input: sbol,
        fields: into_fields(params),
    };
    let result = dispatcher.convert(request).await.context("Conversion failed")?;
    write_output(result, output).await
}

fn into_fields(params: Vec<(String, String)>) -> BTreeMap<String, String> {
    params.into_iter().collect()
}

/// Copy the deliverable to `dest` and print a JSON summary.
async fn write_output(mut result: PipelineOutput, dest: &Path) -> Result<()> {
    tokio::fs::copy(&result.deliverable.path, dest)
        .await
        .with_context(|| format!("Failed to write {}", dest.display()))?;
    result.mark_delivered();
    info!(output = %dest.display(), "result written");

    let summary = json!({
        "request_id": result.request_id,
        "output": dest,
        "content_type": result.deliverable.content_type,
        "verification": result.verification,
        "trace": result.trace,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
