//! Orchestration dispatcher.
//!
//! Drives one request through
//! `Received → Classified → [Converting] → Analyzing → Verified → Packaged`,
//! recording every transition. The transport marks `Delivered`. Any step may
//! end in `Failed`; nothing is retried.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::Instrument;
use uuid::Uuid;

use crate::analysis::{AnalysisAdapter, Packaging, Verification};
use crate::callback::CallbackClient;
use crate::classify;
use crate::config::PipelineConfig;
use crate::conversion::{
    ConversionAdapter, ConversionResult, ConversionTarget, MultiOutput, COMBINE_ARCHIVE_NAME,
};
use crate::engine::{EngineRunner, ProcessRunner};
use crate::error::{PipelineError, PipelineResult};
use crate::obs;
use crate::params::{ANALYSIS_PARAMETERS, CONVERSION_PARAMETERS};
use crate::workdir::WorkingDirectory;

pub const ZIP_CONTENT_TYPE: &str = "application/zip";
pub const XML_CONTENT_TYPE: &str = "application/xml";

const CHUNK_SIZE: usize = 64 * 1024;

/// Result file read in chunks of at most `CHUNK_SIZE` bytes.
pub type ChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Where a request is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Received,
    Classified,
    Converting,
    Analyzing,
    Verified,
    Packaged,
    Delivered,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Classified => "classified",
            PipelineStage::Converting => "converting",
            PipelineStage::Analyzing => "analyzing",
            PipelineStage::Verified => "verified",
            PipelineStage::Packaged => "packaged",
            PipelineStage::Delivered => "delivered",
            PipelineStage::Failed => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Synchronous (response stream) or asynchronous (callback) delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Sync,
    Async,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sync => write!(f, "sync"),
            ExecutionMode::Async => write!(f, "async"),
        }
    }
}

/// Simulate a model, converting it first when it is a genetic design.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzeRequest {
    pub input: PathBuf,
    /// Environment archive, possibly carrying a simulation descriptor.
    pub environment: Option<PathBuf>,
    /// Raw form fields; unknown names are ignored.
    pub fields: BTreeMap<String, String>,
}

impl AnalyzeRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_environment(mut self, environment: impl Into<PathBuf>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// Convert a genetic design without simulating it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertRequest {
    pub input: PathBuf,
    pub fields: BTreeMap<String, String>,
}

impl ConvertRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// A unit of work for [`Dispatcher::run`] or [`Dispatcher::spawn_detached`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Analyze(AnalyzeRequest),
    Convert(ConvertRequest),
}

impl Job {
    pub fn name(&self) -> &'static str {
        match self {
            Job::Analyze(_) => "analysis",
            Job::Convert(_) => "conversion",
        }
    }
}

/// A finished result file, ready to stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub path: PathBuf,
    pub content_type: String,
    /// Suggested name for the client.
    pub file_name: String,
}

impl Deliverable {
    fn new(path: impl Into<PathBuf>, content_type: &str, file_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content_type: content_type.to_string(),
            file_name: file_name.into(),
        }
    }

    pub async fn open(&self) -> std::io::Result<tokio::fs::File> {
        tokio::fs::File::open(&self.path).await
    }

    /// The file as a stream of chunks, read incrementally.
    pub async fn chunk_stream(&self) -> std::io::Result<ChunkStream> {
        let file = self.open().await?;
        Ok(Box::pin(ReaderStream::with_capacity(file, CHUNK_SIZE)))
    }
}

/// Successful pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineOutput {
    pub request_id: Uuid,
    pub deliverable: Deliverable,
    /// `None` for conversion-only jobs.
    pub verification: Option<Verification>,
    pub trace: Vec<PipelineStage>,
}

impl PipelineOutput {
    /// Record hand-off to the transport.
    pub fn mark_delivered(&mut self) {
        if let Some(&last) = self.trace.last() {
            obs::emit_transition(self.request_id, last, PipelineStage::Delivered);
        }
        self.trace.push(PipelineStage::Delivered);
    }
}

/// Handle to a job running detached.
pub struct Detached {
    pub request_id: Uuid,
    pub handle: JoinHandle<()>,
}

struct StageTracker {
    request_id: Uuid,
    current: PipelineStage,
    trace: Vec<PipelineStage>,
}

impl StageTracker {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            current: PipelineStage::Received,
            trace: vec![PipelineStage::Received],
        }
    }

    fn advance(&mut self, to: PipelineStage) {
        obs::emit_transition(self.request_id, self.current, to);
        self.current = to;
        self.trace.push(to);
    }

    fn fail(&mut self, error: PipelineError) -> PipelineError {
        obs::emit_pipeline_failed(self.request_id, self.current, &error);
        self.advance(PipelineStage::Failed);
        error
    }
}

/// Runs analysis and conversion jobs against one engine.
#[derive(Clone)]
pub struct Dispatcher {
    config: Arc<PipelineConfig>,
    conversion: ConversionAdapter,
    analysis: AnalysisAdapter,
    callbacks: CallbackClient,
}

impl Dispatcher {
    pub fn new(config: PipelineConfig, runner: Arc<dyn EngineRunner>) -> Self {
        Self {
            conversion: ConversionAdapter::new(runner.clone(), config.engine.clone()),
            analysis: AnalysisAdapter::new(runner, config.engine.clone()),
            callbacks: CallbackClient::new(),
            config: Arc::new(config),
        }
    }

    /// Dispatcher that launches the engine as a child process.
    pub fn with_process_runner(config: PipelineConfig) -> Self {
        Self::new(config, Arc::new(ProcessRunner))
    }

    pub fn with_callback_client(mut self, callbacks: CallbackClient) -> Self {
        self.callbacks = callbacks;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Synchronous analysis.
    pub async fn analyze(&self, request: AnalyzeRequest) -> PipelineResult<PipelineOutput> {
        self.run(Job::Analyze(request)).await
    }

    /// Synchronous conversion.
    pub async fn convert(&self, request: ConvertRequest) -> PipelineResult<PipelineOutput> {
        self.run(Job::Convert(request)).await
    }

    /// Run `job` to completion in the caller's task.
    pub async fn run(&self, job: Job) -> PipelineResult<PipelineOutput> {
        let request_id = Uuid::new_v4();
        obs::emit_request_accepted(request_id, job.name(), ExecutionMode::Sync);
        self.execute(request_id, job)
            .instrument(obs::request_span(request_id, ExecutionMode::Sync))
            .await
    }

    /// Run `job` in the background and report through `callback_template`.
    ///
    /// The template's `{event}` placeholder becomes `complete` or `error`.
    /// Callback failures are logged only.
    pub fn spawn_detached(&self, job: Job, callback_template: impl Into<String>) -> Detached {
        let request_id = Uuid::new_v4();
        let template = callback_template.into();
        let this = self.clone();
        obs::emit_request_accepted(request_id, job.name(), ExecutionMode::Async);

        let handle = tokio::spawn(
            async move {
                let result = this.execute(request_id, job).await;
                match result {
                    Ok(mut output) => {
                        if this.callbacks.deliver_complete(&template, &output.deliverable).await {
                            output.mark_delivered();
                        }
                    }
                    Err(error) => {
                        this.callbacks.deliver_error(&template, &error).await;
                    }
                }
            }
            .instrument(obs::request_span(request_id, ExecutionMode::Async)),
        );

        Detached { request_id, handle }
    }

    async fn execute(&self, request_id: Uuid, job: Job) -> PipelineResult<PipelineOutput> {
        let mut tracker = StageTracker::new(request_id);
        let flow = match &job {
            Job::Analyze(request) => self.analyze_flow(&mut tracker, request).await,
            Job::Convert(request) => self.convert_flow(&mut tracker, request).await,
        };

        match flow {
            Ok((deliverable, verification)) => Ok(PipelineOutput {
                request_id,
                deliverable,
                verification,
                trace: tracker.trace,
            }),
            Err(error) => Err(tracker.fail(error)),
        }
    }

    async fn analyze_flow(
        &self,
        tracker: &mut StageTracker,
        request: &AnalyzeRequest,
    ) -> PipelineResult<(Deliverable, Option<Verification>)> {
        let workdir = self.workdir("analysis", tracker.request_id).await?;

        let classification = classify::classify(
            &request.input,
            request.environment.as_deref(),
            &workdir.outputs(),
        )
        .await?;
        tracker.advance(PipelineStage::Classified);

        let target = if classification.needs_conversion() {
            tracker.advance(PipelineStage::Converting);
            let conversion_params = CONVERSION_PARAMETERS.process(&request.fields);
            let converted = self
                .conversion
                .convert(
                    classification.path(),
                    &workdir,
                    &conversion_params,
                    ConversionTarget::TopModulePath,
                )
                .await?;
            converted_model(&converted)?
        } else {
            classification.path().to_path_buf()
        };

        tracker.advance(PipelineStage::Analyzing);
        let analysis_params = ANALYSIS_PARAMETERS.process(&request.fields);
        let verification = self
            .analysis
            .analyze(&target, &workdir, &analysis_params)
            .await?;
        tracker.advance(PipelineStage::Verified);

        let result = self
            .analysis
            .package(&workdir, &analysis_params, Packaging::Archive)
            .await?;
        tracker.advance(PipelineStage::Packaged);

        let file_name = result
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Ok((
            Deliverable::new(result.path(), ZIP_CONTENT_TYPE, file_name),
            Some(verification),
        ))
    }

    async fn convert_flow(
        &self,
        tracker: &mut StageTracker,
        request: &ConvertRequest,
    ) -> PipelineResult<(Deliverable, Option<Verification>)> {
        let workdir = self.workdir("conversion", tracker.request_id).await?;

        tracker.advance(PipelineStage::Converting);
        let params = CONVERSION_PARAMETERS.process(&request.fields);
        let converted = self
            .conversion
            .convert(&request.input, &workdir, &params, ConversionTarget::Archive)
            .await?;

        let deliverable = match converted {
            ConversionResult::SinglePath(path) => {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                Deliverable::new(path, XML_CONTENT_TYPE, file_name)
            }
            ConversionResult::MultiArchive {
                output: MultiOutput::Combine(archive),
                ..
            } => Deliverable::new(archive.path(), ZIP_CONTENT_TYPE, COMBINE_ARCHIVE_NAME),
            ConversionResult::MultiArchive {
                output: MultiOutput::TopModule(path),
                ..
            } => {
                return Err(PipelineError::Task(format!(
                    "archive requested but conversion resolved to {}",
                    path.display()
                )))
            }
        };
        tracker.advance(PipelineStage::Packaged);

        Ok((deliverable, None))
    }

    async fn workdir(&self, purpose: &str, request_id: Uuid) -> PipelineResult<WorkingDirectory> {
        Ok(WorkingDirectory::create(&self.config.work_root, purpose, request_id).await?)
    }
}

fn converted_model(result: &ConversionResult) -> PipelineResult<PathBuf> {
    result
        .model_path()
        .map(Path::to_path_buf)
        .ok_or_else(|| PipelineError::Task("conversion produced no model path".to_string()))
}
