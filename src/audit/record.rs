//! The audit record written once per request.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

/// Longest response summary kept in a record, in bytes.
pub const MAX_RESPONSE_SUMMARY_BYTES: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Admitted,
    Rejected,
}

/// One line of the audit trail.
///
/// Serialized as a single JSON object; the file sink writes one per line.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub outcome: AuditOutcome,
    pub message: &'static str,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    /// Milliseconds from receipt to just before the response is written
    pub latency_ms: f64,
    pub client_identity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Parsed request body, `null` when the body was absent or not JSON
    pub request_body: Value,
    pub response_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl AuditRecord {
    /// Start a record for a request. Outcome and level are set by the logger.
    pub fn new(method: impl Into<String>, path: impl Into<String>, client_identity: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level: AuditLevel::Info,
            outcome: AuditOutcome::Admitted,
            message: "API Request",
            method: method.into(),
            path: path.into(),
            status_code: 0,
            latency_ms: 0.0,
            client_identity: client_identity.into(),
            user_agent: None,
            request_body: Value::Null,
            response_summary: String::new(),
            request_id: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_request_body(mut self, body: Value) -> Self {
        self.request_body = body;
        self
    }

    /// Fill in the response side.
    pub fn completed(mut self, status_code: u16, latency: Duration, response_summary: &str) -> Self {
        self.status_code = status_code;
        self.latency_ms = latency.as_micros() as f64 / 1000.0;
        self.response_summary = summarize(response_summary);
        self
    }

    pub(crate) fn mark(&mut self, outcome: AuditOutcome) {
        self.outcome = outcome;
        match outcome {
            AuditOutcome::Admitted => {
                self.level = AuditLevel::Info;
                self.message = "API Request";
            }
            AuditOutcome::Rejected => {
                self.level = AuditLevel::Error;
                self.message = "API Error";
            }
        }
    }
}

/// Truncate `text` to at most [`MAX_RESPONSE_SUMMARY_BYTES`] on a char boundary.
pub fn summarize(text: &str) -> String {
    if text.len() <= MAX_RESPONSE_SUMMARY_BYTES {
        return text.to_string();
    }

    let mut end = MAX_RESPONSE_SUMMARY_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", text.get(..end).unwrap_or_default())
}
