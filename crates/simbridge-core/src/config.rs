//! Engine and pipeline configuration.

use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_ANALYSIS_JAR: &str =
    "/iBioSim/analysis/target/iBioSim-analysis-3.1.0-SNAPSHOT-jar-with-dependencies.jar";
pub const DEFAULT_CONVERSION_JAR: &str =
    "/iBioSim/conversion/target/iBioSim-conversion-3.1.0-SNAPSHOT-jar-with-dependencies.jar";
pub const DEFAULT_URI_PREFIX: &str = "http://www.async.utah.edu/";
pub const DEFAULT_REPOSITORY: &str = "https://synbiohub.programmingbiology.org/";

/// How to launch the external simulation/conversion engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EngineConfig {
    /// Launcher program (e.g. `java`).
    pub program: String,
    /// Arguments placed before the flags for analysis runs.
    pub analysis_args: Vec<String>,
    /// Arguments placed before the flags for conversion runs.
    pub conversion_args: Vec<String>,
    /// Wall-clock limit per engine run; 0 disables the limit.
    pub timeout_secs: u64,
    /// Default `-p` for conversions when the request supplies none.
    pub uri_prefix: String,
    /// Default `-r` for conversions when the request supplies none.
    pub repository: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            program: "java".to_string(),
            analysis_args: vec!["-jar".to_string(), DEFAULT_ANALYSIS_JAR.to_string()],
            conversion_args: vec!["-jar".to_string(), DEFAULT_CONVERSION_JAR.to_string()],
            timeout_secs: 3600,
            uri_prefix: DEFAULT_URI_PREFIX.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
        }
    }
}

impl EngineConfig {
    /// Engine launched directly as `program` with no prefix arguments.
    pub fn direct(program: impl Into<String>) -> Self {
        EngineConfig {
            program: program.into(),
            analysis_args: Vec::new(),
            conversion_args: Vec::new(),
            ..Self::default()
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Per-run timeout, `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Configuration for a [`crate::Dispatcher`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    pub engine: EngineConfig,
    /// Parent of every per-request working directory.
    pub work_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            engine: EngineConfig::default(),
            work_root: std::env::temp_dir().join("simbridge"),
        }
    }
}

impl PipelineConfig {
    pub fn new(engine: EngineConfig, work_root: impl Into<PathBuf>) -> Self {
        PipelineConfig {
            engine,
            work_root: work_root.into(),
        }
    }
}

/// Pipeline settings as command-line flags, each with a `SIMBRIDGE_*`
/// environment fallback. Flattened into both binaries.
#[derive(Args, Debug, Clone)]
pub struct PipelineArgs {
    /// Parent directory for per-request working directories
    #[arg(long, env = "SIMBRIDGE_WORK_ROOT")]
    pub work_root: Option<PathBuf>,

    /// Program used to launch the engine
    #[arg(long, env = "SIMBRIDGE_ENGINE_PROGRAM", default_value = "java")]
    pub engine_program: String,

    /// Analysis engine jar
    #[arg(long, env = "SIMBRIDGE_ANALYSIS_JAR", default_value = DEFAULT_ANALYSIS_JAR)]
    pub analysis_jar: String,

    /// Conversion engine jar
    #[arg(long, env = "SIMBRIDGE_CONVERSION_JAR", default_value = DEFAULT_CONVERSION_JAR)]
    pub conversion_jar: String,

    /// Per-run engine timeout in seconds (0 disables)
    #[arg(long, env = "SIMBRIDGE_ENGINE_TIMEOUT_SECS", default_value_t = 3600)]
    pub engine_timeout_secs: u64,

    /// Conversion `-p` default when a request supplies none
    #[arg(long, env = "SIMBRIDGE_URI_PREFIX", default_value = DEFAULT_URI_PREFIX)]
    pub uri_prefix: String,

    /// Conversion `-r` default when a request supplies none
    #[arg(long, env = "SIMBRIDGE_REPOSITORY", default_value = DEFAULT_REPOSITORY)]
    pub repository: String,
}

impl PipelineArgs {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            program: self.engine_program.clone(),
            analysis_args: vec!["-jar".to_string(), self.analysis_jar.clone()],
            conversion_args: vec!["-jar".to_string(), self.conversion_jar.clone()],
            timeout_secs: self.engine_timeout_secs,
            uri_prefix: self.uri_prefix.clone(),
            repository: self.repository.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        match &self.work_root {
            Some(root) => PipelineConfig::new(self.engine_config(), root),
            None => PipelineConfig {
                engine: self.engine_config(),
                ..PipelineConfig::default()
            },
        }
    }
}
