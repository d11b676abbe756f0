//! Structured lifecycle events for pipeline requests.
//!
//! Every event carries a stable `event` field so log pipelines can filter on
//! it regardless of the human-readable message.

use tracing::{info, warn};
use uuid::Uuid;

use crate::dispatch::{ExecutionMode, PipelineStage};

/// Span covering one request, tagged with its id and execution mode.
pub fn request_span(request_id: Uuid, mode: ExecutionMode) -> tracing::Span {
    tracing::info_span!("simbridge.request", request_id = %request_id, mode = %mode)
}

pub fn emit_request_accepted(request_id: Uuid, job: &str, mode: ExecutionMode) {
    info!(event = "request.accepted", request_id = %request_id, job = %job, mode = %mode);
}

pub fn emit_transition(request_id: Uuid, from: PipelineStage, to: PipelineStage) {
    info!(event = "pipeline.transition", request_id = %request_id, from = %from, to = %to);
}

pub fn emit_pipeline_failed(request_id: Uuid, stage: PipelineStage, error: &dyn std::fmt::Display) {
    warn!(event = "pipeline.failed", request_id = %request_id, stage = %stage, error = %error);
}

pub fn emit_engine_invoked(command_line: &str) {
    info!(event = "engine.invoked", command = %command_line);
}

pub fn emit_engine_exited(exit_code: i32, duration_ms: u64) {
    info!(event = "engine.exited", exit_code = exit_code, duration_ms = duration_ms);
}

/// Non-fatal: the run finished but its values look numerically broken.
pub fn emit_nan_warning(reason: &str) {
    warn!(event = "analysis.nan_warning", reason = %reason, "results may indicate an invalid model");
}

pub fn emit_callback_delivered(url: &str, event_name: &str, status: u16) {
    info!(event = "callback.delivered", url = %url, callback_event = %event_name, status = status);
}

pub fn emit_callback_failed(url: &str, event_name: &str, error: &dyn std::fmt::Display) {
    warn!(event = "callback.failed", url = %url, callback_event = %event_name, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_span_carries_mode() {
        let span = request_span(Uuid::new_v4(), ExecutionMode::Async);
        span.in_scope(|| {
            emit_transition(Uuid::new_v4(), PipelineStage::Received, PipelineStage::Classified)
        });
    }
}
