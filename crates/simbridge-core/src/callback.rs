//! Outbound callbacks for asynchronous jobs.
//!
//! One POST per job, to the caller's URL template with `{event}` replaced by
//! `complete` or `error`. Delivery failures are logged and dropped.

use std::fmt;

use reqwest::header::{CONTENT_DISPOSITION, CONTENT_TYPE};

use crate::dispatch::Deliverable;
use crate::error::PipelineError;
use crate::obs;

/// Placeholder substituted in callback URL templates.
pub const EVENT_PLACEHOLDER: &str = "{event}";

/// Outcome reported to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackEvent {
    Complete,
    Error,
}

impl CallbackEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackEvent::Complete => "complete",
            CallbackEvent::Error => "error",
        }
    }
}

impl fmt::Display for CallbackEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Substitute the first `{event}` in `template`.
pub fn callback_url(template: &str, event: CallbackEvent) -> String {
    template.replacen(EVENT_PLACEHOLDER, event.as_str(), 1)
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("callback request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("callback endpoint answered {0}")]
    Status(u16),

    #[error("could not read result file: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP client for callback delivery.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    http_client: reqwest::Client,
}

impl Default for CallbackClient {
    fn default() -> Self {
        Self::new()
    }
}

impl CallbackClient {
    pub fn new() -> Self {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("simbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http_client }
    }

    pub fn with_client(http_client: reqwest::Client) -> Self {
        Self { http_client }
    }

    /// POST the deliverable as the request body, streamed from disk.
    pub async fn send_complete(
        &self,
        template: &str,
        deliverable: &Deliverable,
    ) -> Result<u16, CallbackError> {
        let url = callback_url(template, CallbackEvent::Complete);
        let file = deliverable.open().await?;
        let response = self
            .http_client
            .post(&url)
            .header(CONTENT_TYPE, deliverable.content_type.as_str())
            .header(
                CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", deliverable.file_name),
            )
            .body(reqwest::Body::from(file))
            .send()
            .await?;
        check_status(response.status())
    }

    /// POST `{"error": <ErrorBody>}`.
    pub async fn send_error(&self, template: &str, error: &PipelineError) -> Result<u16, CallbackError> {
        let url = callback_url(template, CallbackEvent::Error);
        let response = self
            .http_client
            .post(&url)
            .json(&serde_json::json!({ "error": error.to_body() }))
            .send()
            .await?;
        check_status(response.status())
    }

    /// Deliver a success, logging the outcome. Returns whether it was accepted.
    pub async fn deliver_complete(&self, template: &str, deliverable: &Deliverable) -> bool {
        let result = self.send_complete(template, deliverable).await;
        log_delivery(template, CallbackEvent::Complete, result)
    }

    /// Deliver a failure, logging the outcome. Returns whether it was accepted.
    pub async fn deliver_error(&self, template: &str, error: &PipelineError) -> bool {
        let result = self.send_error(template, error).await;
        log_delivery(template, CallbackEvent::Error, result)
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<u16, CallbackError> {
    if status.is_success() {
        Ok(status.as_u16())
    } else {
        Err(CallbackError::Status(status.as_u16()))
    }
}

fn log_delivery(template: &str, event: CallbackEvent, result: Result<u16, CallbackError>) -> bool {
    let url = callback_url(template, event);
    match result {
        Ok(status) => {
            obs::emit_callback_delivered(&url, event.as_str(), status);
            true
        }
        Err(err) => {
            obs::emit_callback_failed(&url, event.as_str(), &err);
            false
        }
    }
}
