// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identity-provider capability surface consumed by the session manager.
//!
//! The provider client (login popups, consent, the local credential cache) is
//! external. Hosts implement [`IdentityProvider`] over it and
//! [`IdentityPrompt`] over their account picker.

use std::fmt;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Scopes requested by interactive sign-in.
pub const LOGIN_SCOPES: &[&str] = &["openid", "profile", "User.Read"];

/// Scopes required by the managed-device query.
pub const TOKEN_SCOPES: &[&str] = &["User.Read", "DeviceManagementManagedDevices.Read.All"];

/// A cached, authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable key: the provider's username claim.
    pub unique_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(unique_name: impl Into<String>) -> Self {
        Self { unique_name: unique_name.into(), display_name: None }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Name shown to the agent: display name when present, else the key.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(&self.unique_name)
    }
}

/// Bearer credential. Not `Clone`: each token is moved into exactly one call.
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Scopes plus the identity a token is requested for.
#[derive(Debug, Clone, Copy)]
pub struct TokenRequest<'a> {
    pub scopes: &'a [&'a str],
    pub identity: &'a Identity,
}

/// Result of an interactive sign-in.
#[derive(Debug)]
pub struct SignInResult {
    pub identity: Identity,
    pub token: AccessToken,
}

/// Failure categories reported by the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Silent acquisition needs user interaction (cache miss, expired refresh
    /// token, login required).
    InteractionRequired,
    /// The user closed or dismissed the popup.
    UserCancelled,
    /// The requested scopes need (admin) consent.
    ConsentRequired,
    /// The token lacks a scope the resource requires.
    InsufficientScope,
    Other,
}

impl ProviderErrorKind {
    /// Map a provider wire code (OAuth `error` values, provider error codes,
    /// or `AADSTS` numeric codes) onto a kind.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        match code.as_str() {
            "interaction_required" | "login_required" | "no_tokens_found" | "no_account_error"
            | "monitor_window_timeout" | "invalid_grant" => Self::InteractionRequired,
            "user_cancelled" | "user_canceled" | "access_denied_by_user" => Self::UserCancelled,
            "consent_required" => Self::ConsentRequired,
            "insufficient_scope" => Self::InsufficientScope,
            _ if is_consent_aadsts(&code) => Self::ConsentRequired,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InteractionRequired => "interaction_required",
            Self::UserCancelled => "user_cancelled",
            Self::ConsentRequired => "consent_required",
            Self::InsufficientScope => "insufficient_scope",
            Self::Other => "other",
        }
    }

    /// True for kinds that mean the identity lacks rights, not that the
    /// attempt failed transiently.
    pub fn is_permission_denial(&self) -> bool {
        matches!(self, Self::ConsentRequired | Self::InsufficientScope)
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `AADSTS65001` (consent not granted), `AADSTS90008` (application not
/// consented) and `AADSTS90094` (admin consent required), with or without the
/// prefix. Expects a lowercased code.
fn is_consent_aadsts(code: &str) -> bool {
    let digits = code.strip_prefix("aadsts").unwrap_or(code);
    matches!(digits, "65001" | "90094" | "90008")
}

/// Typed failure from an identity-provider call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    /// Build from a provider wire code and message.
    pub fn from_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::from_code(code), message)
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ProviderErrorKind::UserCancelled
    }
}

/// Identity-provider client capability surface.
///
/// Object-safe for use as `Arc<dyn IdentityProvider>`.
pub trait IdentityProvider: Send + Sync + 'static {
    /// One-time client setup. Not safely re-runnable.
    fn initialize(&self) -> BoxFuture<'_, Result<(), ProviderError>>;

    /// Complete a pending interactive-redirect handshake, if any.
    fn handle_pending_redirect(&self) -> BoxFuture<'_, Result<Option<Identity>, ProviderError>>;

    /// All identities in the local credential cache.
    fn all_identities(&self) -> Vec<Identity>;

    fn identity_by_key(&self, unique_name: &str) -> Option<Identity>;

    /// Acquire from the cache or by refresh; fails when interaction is required.
    fn acquire_silent<'a>(
        &'a self,
        request: TokenRequest<'a>,
    ) -> BoxFuture<'a, Result<AccessToken, ProviderError>>;

    /// Acquire through a consent/login popup.
    fn acquire_interactive<'a>(
        &'a self,
        request: TokenRequest<'a>,
    ) -> BoxFuture<'a, Result<AccessToken, ProviderError>>;

    fn sign_in_popup<'a>(
        &'a self,
        scopes: &'a [&'a str],
    ) -> BoxFuture<'a, Result<SignInResult, ProviderError>>;

    fn sign_out_popup<'a>(&'a self, identity: &'a Identity)
        -> BoxFuture<'a, Result<(), ProviderError>>;
}

/// Account picker shown when several identities are cached.
pub trait IdentityPrompt: Send + Sync + 'static {
    /// Ask the agent to pick one of `candidates`. `None` means cancelled.
    fn choose<'a>(&'a self, candidates: &'a [Identity]) -> BoxFuture<'a, Option<Identity>>;
}
