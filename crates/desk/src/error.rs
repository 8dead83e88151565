// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failures produced by the session manager, the credential gate, and the
/// device lookup workflow.
///
/// A dismissed interactive prompt is not a failure; interactive operations
/// report it as [`Outcome::Cancelled`]. [`PanelError::Cancelled`] only exists
/// for paths whose success value is a token or a result, and callers treat it
/// as a no-op (see [`PanelError::is_cancellation`]).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PanelError {
    #[error("no signed-in identity")]
    NoIdentity,
    #[error("token acquisition failed: {0}")]
    AcquisitionFailed(String),
    #[error("access denied: the signed-in identity lacks the required permissions")]
    PermissionDenied,
    #[error("{}", remote_call_message(.0))]
    RemoteCallFailed(Option<u16>),
    #[error("initialization failed: {0}")]
    InitializationFailed(String),
    #[error("session is not initialized")]
    NotInitialized,
    #[error("interactive {0}")]
    InteractionFailed(String),
    #[error("cancelled by user")]
    Cancelled,
    #[error("host error: {0}")]
    Host(String),
    #[error("bad request: {0}")]
    BadRequest(String),
}

fn remote_call_message(status: &Option<u16>) -> String {
    match status {
        Some(status) => format!("remote call failed with HTTP status {status}"),
        None => "remote call failed before a response was received".to_owned(),
    }
}

impl PanelError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NoIdentity => ErrorCode::NoIdentity,
            Self::AcquisitionFailed(_) => ErrorCode::AcquisitionFailed,
            Self::PermissionDenied => ErrorCode::PermissionDenied,
            Self::RemoteCallFailed(_) => ErrorCode::RemoteCallFailed,
            Self::InitializationFailed(_) => ErrorCode::InitializationFailed,
            Self::NotInitialized => ErrorCode::NotInitialized,
            Self::InteractionFailed(_) => ErrorCode::InteractionFailed,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Host(_) => ErrorCode::HostError,
            Self::BadRequest(_) => ErrorCode::BadRequest,
        }
    }

    /// True when the user dismissed a prompt; presentation ignores these.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        self.code().to_http_response(self.to_string())
    }
}

/// Result of an interactive operation that the user may dismiss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Cancelled,
}

/// Machine-readable error codes shared by the HTTP bridge and panel events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    BadRequest,
    NoIdentity,
    AcquisitionFailed,
    PermissionDenied,
    RemoteCallFailed,
    InitializationFailed,
    NotInitialized,
    InteractionFailed,
    Cancelled,
    HostError,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::NoIdentity => 409,
            Self::AcquisitionFailed => 502,
            Self::PermissionDenied => 403,
            Self::RemoteCallFailed => 502,
            Self::InitializationFailed => 500,
            Self::NotInitialized => 503,
            Self::InteractionFailed => 502,
            Self::Cancelled => 409,
            Self::HostError => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadRequest => "BAD_REQUEST",
            Self::NoIdentity => "NO_IDENTITY",
            Self::AcquisitionFailed => "ACQUISITION_FAILED",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::RemoteCallFailed => "REMOTE_CALL_FAILED",
            Self::InitializationFailed => "INITIALIZATION_FAILED",
            Self::NotInitialized => "NOT_INITIALIZED",
            Self::InteractionFailed => "INTERACTION_FAILED",
            Self::Cancelled => "CANCELLED",
            Self::HostError => "HOST_ERROR",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}
