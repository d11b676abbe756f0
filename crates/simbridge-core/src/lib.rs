//! simbridge core library
//!
//! Format classification, engine invocation, archive assembly and the
//! orchestration dispatcher behind the simbridge server and CLI.

pub mod analysis;
pub mod archive;
pub mod callback;
pub mod classify;
pub mod config;
pub mod conversion;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod obs;
pub mod params;
pub mod telemetry;
pub mod workdir;

pub use analysis::{
    verify_analysis_output, AnalysisAdapter, AnalysisReport, AnalysisResult, Packaging,
    Verification,
};
pub use archive::{Archive, ArchiveBuilder, Selection};
pub use callback::{callback_url, CallbackClient, CallbackError, CallbackEvent};
pub use classify::{classify, Classification, ModelFormat};
pub use config::{EngineConfig, PipelineArgs, PipelineConfig};
pub use conversion::{
    resolve_top_module, ConversionAdapter, ConversionResult, ConversionTarget, MultiOutput,
};
pub use dispatch::{
    AnalyzeRequest, ConvertRequest, Deliverable, Detached, Dispatcher, ExecutionMode, Job,
    PipelineOutput, PipelineStage,
};
pub use engine::{EngineInvocation, EngineOutcome, EngineRunner, ProcessRunner};
pub use error::{ErrorBody, PipelineError, PipelineResult};
pub use params::{
    ParamKind, ParamValue, Parameter, ParameterMap, ParameterSet, ANALYSIS_PARAMETERS,
    CONVERSION_PARAMETERS,
};
pub use telemetry::init_tracing;
pub use workdir::WorkingDirectory;

/// Crate version, reported by `/status`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
