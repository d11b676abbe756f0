//! Analysis adapter: run the simulation engine and verify what it wrote.
//!
//! The engine exits zero on many failures, so a clean exit is only the first
//! check. [`verify_analysis_output`] inspects the output directory and
//! decides whether the run is usable.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use crate::archive::{self, Archive, Selection};
use crate::classify;
use crate::config::EngineConfig;
use crate::engine::{EngineInvocation, EngineRunner, OUT_DIR_FLAG};
use crate::error::{PipelineError, PipelineResult};
use crate::obs;
use crate::params::{ParameterSet, ANALYSIS_PARAMETERS, OUTPUT_ALL};
use crate::workdir::WorkingDirectory;

/// Written by the engine only when a run completes.
pub const SENTINEL_FILE: &str = "statistics.txt";
/// Run-output files are `run-<n>.tsd`.
pub const RUN_FILE_PREFIX: &str = "run-";
pub const RUN_FILE_EXT: &str = "tsd";
/// Archive written into the working directory when packaging.
pub const RESULTS_ARCHIVE_NAME: &str = "results.zip";

const INVALID_NUMBER_MARKER: &[u8] = b"nan";

/// Post-execution check of an analysis output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum Verification {
    Verified,
    /// Usable, but something looks wrong with the numbers.
    Suspect(String),
    /// Not usable.
    Invalid(String),
}

impl Verification {
    pub fn is_usable(&self) -> bool {
        !matches!(self, Verification::Invalid(_))
    }
}

impl fmt::Display for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Verified => write!(f, "verified"),
            Verification::Suspect(reason) => write!(f, "suspect: {reason}"),
            Verification::Invalid(reason) => write!(f, "invalid: {reason}"),
        }
    }
}

/// How analysis results are handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    /// The raw output directory.
    Directory,
    /// A zip of the run files (or everything, with `outputAll`).
    Archive,
}

/// Packaged analysis results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalysisResult {
    Directory(PathBuf),
    Archive(Archive),
}

impl AnalysisResult {
    pub fn path(&self) -> &Path {
        match self {
            AnalysisResult::Directory(dir) => dir,
            AnalysisResult::Archive(archive) => archive.path(),
        }
    }
}

/// Verified and packaged results of one analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub result: AnalysisResult,
    pub verification: Verification,
}

/// Drives the simulation engine through an [`EngineRunner`].
#[derive(Clone)]
pub struct AnalysisAdapter {
    runner: Arc<dyn EngineRunner>,
    engine: EngineConfig,
}

impl AnalysisAdapter {
    pub fn new(runner: Arc<dyn EngineRunner>, engine: EngineConfig) -> Self {
        Self { runner, engine }
    }

    /// Run and verify, then package.
    pub async fn run(
        &self,
        target: &Path,
        workdir: &WorkingDirectory,
        parameters: &ParameterSet,
        packaging: Packaging,
    ) -> PipelineResult<AnalysisReport> {
        let verification = self.analyze(target, workdir, parameters).await?;
        let result = self.package(workdir, parameters, packaging).await?;
        Ok(AnalysisReport {
            result,
            verification,
        })
    }

    /// Invoke the engine on `target` and verify its outputs.
    ///
    /// Returns `Verified` or `Suspect`; an `Invalid` directory becomes
    /// [`PipelineError::UnexpectedOutput`].
    pub async fn analyze(
        &self,
        target: &Path,
        workdir: &WorkingDirectory,
        parameters: &ParameterSet,
    ) -> PipelineResult<Verification> {
        let target = if workdir.contains(target) {
            target.to_path_buf()
        } else {
            workdir.stage_input(target).await?
        };
        let outputs = workdir.outputs();

        let invocation = EngineInvocation::new(&self.engine.program, &self.engine.analysis_args)
            .args(ANALYSIS_PARAMETERS.encode_args(parameters))
            .out_dir_flag(OUT_DIR_FLAG, &outputs)
            .input(&target)
            .current_dir(&outputs)
            .timeout(self.engine.timeout());

        info!(target = %target.display(), "running analysis");
        let outcome = self.runner.run(&invocation).await?.into_result()?;

        match verify_analysis_output(&outputs).await? {
            Verification::Invalid(reason) => {
                debug!(%reason, "analysis output rejected");
                Err(PipelineError::UnexpectedOutput {
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                })
            }
            Verification::Suspect(reason) => {
                obs::emit_nan_warning(&reason);
                Ok(Verification::Suspect(reason))
            }
            Verification::Verified => Ok(Verification::Verified),
        }
    }

    /// Hand back the output directory, or archive it.
    pub async fn package(
        &self,
        workdir: &WorkingDirectory,
        parameters: &ParameterSet,
        packaging: Packaging,
    ) -> PipelineResult<AnalysisResult> {
        let outputs = workdir.outputs();
        match packaging {
            Packaging::Directory => Ok(AnalysisResult::Directory(outputs)),
            Packaging::Archive => {
                let selection = if parameters.flag_enabled(OUTPUT_ALL) {
                    Selection::All
                } else {
                    Selection::Glob(format!("*.{RUN_FILE_EXT}"))
                };
                let dest = workdir.path().join(RESULTS_ARCHIVE_NAME);
                let archive = tokio::task::spawn_blocking(move || {
                    archive::zip_directory(&outputs, &selection, &dest)
                })
                .await??;
                Ok(AnalysisResult::Archive(archive))
            }
        }
    }
}

/// Check `dir` for the sentinel and for invalid numbers in the first run file.
pub async fn verify_analysis_output(dir: &Path) -> std::io::Result<Verification> {
    if !tokio::fs::try_exists(dir.join(SENTINEL_FILE)).await? {
        return Ok(Verification::Invalid(format!("{SENTINEL_FILE} missing")));
    }

    let Some(first_run) = first_run_file(dir).await? else {
        return Ok(Verification::Suspect("no run output files".to_string()));
    };

    if contains_invalid_number(&first_run).await? {
        let name = first_run
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(Verification::Suspect(format!("{name} contains NaN values")));
    }

    Ok(Verification::Verified)
}

/// Lowest-numbered `run-<n>.tsd` in `dir`.
pub async fn first_run_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    let mut best: Option<(u64, PathBuf)> = None;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let Some(index) = run_index(&path) else {
            continue;
        };
        if best.as_ref().map(|(b, _)| index < *b).unwrap_or(true) {
            best = Some((index, path));
        }
    }
    Ok(best.map(|(_, path)| path))
}

fn run_index(path: &Path) -> Option<u64> {
    if path.extension()? != RUN_FILE_EXT {
        return None;
    }
    path.file_stem()?
        .to_str()?
        .strip_prefix(RUN_FILE_PREFIX)?
        .parse()
        .ok()
}

/// Byte-wise, case-insensitive scan; run files are not guaranteed to be UTF-8.
async fn contains_invalid_number(path: &Path) -> std::io::Result<bool> {
    let mut reader = BufReader::new(tokio::fs::File::open(path).await?);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(false);
        }
        line.make_ascii_lowercase();
        if classify::contains(&line, INVALID_NUMBER_MARKER) {
            return Ok(true);
        }
    }
}
