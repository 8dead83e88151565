// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential gate: token acquisition with silent-then-interactive fallback,
//! and the protected-call wrapper that classifies remote failures and
//! records the per-identity access lockout.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use crate::error::PanelError;
use crate::identity::{AccessToken, Identity, IdentityProvider, ProviderErrorKind, TokenRequest};
use crate::session::SessionManager;

/// Category of a failed remote call, fixed when the failure is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Authorization rejected: HTTP 401/403, or a consent / insufficient
    /// scope signal in the error payload.
    PermissionDenied,
    /// Any other non-success status.
    Status(u16),
    /// No response was received.
    Transport,
}

/// Failure reported by a protected remote call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{detail}")]
pub struct RemoteFailure {
    pub kind: FailureKind,
    pub detail: String,
}

impl RemoteFailure {
    /// Classify a non-success response by status and payload.
    pub fn classify(status: u16, body: &str) -> Self {
        let denied = status == 401 || status == 403 || payload_denies_access(body);
        let kind = if denied { FailureKind::PermissionDenied } else { FailureKind::Status(status) };
        let detail = match error_code(body) {
            Some(code) => format!("HTTP {status}: {code}"),
            None => format!("HTTP {status}"),
        };
        Self { kind, detail }
    }

    pub fn transport(detail: impl Into<String>) -> Self {
        Self { kind: FailureKind::Transport, detail: detail.into() }
    }

    pub fn into_panel_error(self) -> PanelError {
        match self.kind {
            FailureKind::PermissionDenied => PanelError::PermissionDenied,
            FailureKind::Status(status) => PanelError::RemoteCallFailed(Some(status)),
            FailureKind::Transport => PanelError::RemoteCallFailed(None),
        }
    }
}

/// `{"error":{"code":".."}}` (directory API) or `{"error":".."}` (OAuth).
fn error_code(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    match value.get("error")? {
        Value::String(code) => Some(code.clone()),
        Value::Object(obj) => obj.get("code").and_then(Value::as_str).map(str::to_owned),
        _ => None,
    }
}

fn payload_denies_access(body: &str) -> bool {
    if let Some(code) = error_code(body) {
        if code == "Authorization_RequestDenied"
            || ProviderErrorKind::from_code(&code).is_permission_denial()
        {
            return true;
        }
    }
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    value.get("error_codes").and_then(Value::as_array).is_some_and(|codes| {
        codes
            .iter()
            .filter_map(Value::as_u64)
            .any(|c| ProviderErrorKind::from_code(&c.to_string()).is_permission_denial())
    })
}

/// Acquire a token for `identity`: silently first, then through a popup.
pub async fn acquire(
    provider: &dyn IdentityProvider,
    identity: Option<&Identity>,
    scopes: &[&str],
) -> Result<AccessToken, PanelError> {
    let identity = identity.ok_or(PanelError::NoIdentity)?;
    let request = TokenRequest { scopes, identity };

    match provider.acquire_silent(request).await {
        Ok(token) => return Ok(token),
        Err(e) => tracing::debug!(
            identity = %identity.unique_name,
            kind = %e.kind,
            "silent token acquisition failed, falling back to popup"
        ),
    }

    match provider.acquire_interactive(request).await {
        Ok(token) => {
            tracing::info!(identity = %identity.unique_name, "token acquired interactively");
            Ok(token)
        }
        Err(e) if e.is_cancelled() => Err(PanelError::Cancelled),
        Err(e) => {
            tracing::warn!(identity = %identity.unique_name, err = %e, "interactive token acquisition failed");
            Err(PanelError::AcquisitionFailed(e.to_string()))
        }
    }
}

/// Wraps protected calls for the session's current identity.
#[derive(Clone)]
pub struct CredentialGate {
    session: Arc<SessionManager>,
}

impl CredentialGate {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Acquire a token for the current identity.
    pub async fn acquire(&self, scopes: &[&str]) -> Result<AccessToken, PanelError> {
        let identity = self.session.current_identity();
        acquire(self.session.provider().as_ref(), identity.as_ref(), scopes).await
    }

    /// Run `call` with a fresh token for the current identity.
    ///
    /// Fails fast with [`PanelError::PermissionDenied`] when the identity is
    /// locked out, before any acquisition. A denial classified from the call
    /// locks the identity out until the next sign-in.
    pub async fn invoke_protected<T, F, Fut>(
        &self,
        scopes: &[&str],
        call: F,
    ) -> Result<T, PanelError>
    where
        F: FnOnce(AccessToken) -> Fut,
        Fut: Future<Output = Result<T, RemoteFailure>>,
    {
        let key = self.session.begin_protected()?;
        let identity = self.session.provider().identity_by_key(&key);
        let token = acquire(self.session.provider().as_ref(), identity.as_ref(), scopes).await?;

        match call(token).await {
            Ok(value) => Ok(value),
            Err(failure) => {
                if failure.kind == FailureKind::PermissionDenied {
                    self.session.record_denial(&key);
                } else {
                    tracing::warn!(identity = %key, err = %failure, "protected call failed");
                }
                Err(failure.into_panel_error())
            }
        }
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
