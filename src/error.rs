// src/error.rs
// Structured failures surfaced to agents

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed enumeration of error codes surfaced to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ProviderNotFound,
    CrdNotAvailable,
    InvalidInput,
    InternalError,
    ProbeTimeout,
    ProbeLimitReached,
    AuthFailed,
}

impl ErrorCode {
    /// Wire form, also used as the span `error.type` attribute.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ProviderNotFound => "PROVIDER_NOT_FOUND",
            ErrorCode::CrdNotAvailable => "CRD_NOT_AVAILABLE",
            ErrorCode::InvalidInput => "INVALID_INPUT",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ProbeTimeout => "PROBE_TIMEOUT",
            ErrorCode::ProbeLimitReached => "PROBE_LIMIT_REACHED",
            ErrorCode::AuthFailed => "AUTH_FAILED",
        }
    }
}

/// Error record returned to agents in an error-flagged result.
///
/// `tool` is the operation name the error belongs to. Internal failures
/// are wrapped with [`ErrorCode::InternalError`] at the bridge boundary;
/// their original message is logged, not surfaced.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("{tool}: {} - {message}", code.as_str())]
pub struct McpError {
    pub code: ErrorCode,
    pub message: String,
    pub tool: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl McpError {
    pub fn new(code: ErrorCode, tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            tool: tool.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn invalid_input(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, tool, message)
    }

    pub fn crd_not_available(tool: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CrdNotAvailable,
            tool,
            "the backing CustomResourceDefinition is not installed in this cluster",
        )
    }

    /// Wrap an unexpected failure. The cause goes into `detail` for the
    /// structured log; the agent-visible message stays generic.
    pub fn internal(tool: impl Into<String>, cause: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::InternalError,
            tool,
            "an internal error occurred while running the operation",
        )
        .with_detail(cause.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_wire_form() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::ProbeLimitReached).unwrap(),
            "\"PROBE_LIMIT_REACHED\""
        );
        assert_eq!(ErrorCode::CrdNotAvailable.as_str(), "CRD_NOT_AVAILABLE");
    }

    #[test]
    fn test_error_serialization_shape() {
        let err = McpError::invalid_input("probe_http", "url is required");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "INVALID_INPUT");
        assert_eq!(json["tool"], "probe_http");
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn test_internal_error_hides_cause_from_message() {
        let err = McpError::internal("list_gateways", "connection refused: 10.0.0.1:6443");
        assert_eq!(err.code, ErrorCode::InternalError);
        assert!(!err.message.contains("10.0.0.1"));
        assert!(err.detail.unwrap().contains("connection refused"));
    }

    #[test]
    fn test_display_includes_code_and_tool() {
        let err = McpError::crd_not_available("get_httproute");
        let text = err.to_string();
        assert!(text.contains("get_httproute"));
        assert!(text.contains("CRD_NOT_AVAILABLE"));
    }
}
