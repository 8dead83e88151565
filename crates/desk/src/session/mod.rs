// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session manager: owns the current-identity selection and drives sign-in,
//! sign-out, identity disambiguation, and the background refresh task.
//!
//! State is a single [`SessionState`] behind a synchronous lock. The lock is
//! never held across a provider, prompt, or network await; every operation
//! reads what it needs, releases, awaits, then re-acquires to apply.

pub mod refresh;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{Outcome, PanelError};
use crate::events::{EventHub, PanelEvent};
use crate::identity::{Identity, IdentityPrompt, IdentityProvider, SignInResult, LOGIN_SCOPES};
use crate::session::refresh::{spawn_refresh_task, RefreshCounters, RefreshHandle, RefreshStats};

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Uninitialized,
    Initializing,
    SignedOut,
    SignedIn,
    AwaitingDisambiguation,
    /// Initialization failed. Terminal until the host reloads.
    Error,
}

/// Mutable session state. Holds the identity key only, never a token.
struct SessionState {
    phase: SessionPhase,
    current_identity_key: Option<String>,
    refresh: Option<RefreshHandle>,
    /// Identities that observed an authorization denial since their last
    /// fresh sign-in.
    locked_identities: HashSet<String>,
    init_error: Option<String>,
}

impl SessionState {
    fn check_ready(&self) -> Result<(), PanelError> {
        match self.phase {
            SessionPhase::Uninitialized | SessionPhase::Initializing => {
                Err(PanelError::NotInitialized)
            }
            SessionPhase::Error => Err(PanelError::InitializationFailed(
                self.init_error.clone().unwrap_or_default(),
            )),
            _ => Ok(()),
        }
    }

    fn is_locked_out(&self) -> bool {
        self.current_identity_key
            .as_ref()
            .is_some_and(|current| self.locked_identities.contains(current))
    }
}

/// Serializable view of the session for presentation and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// The protected action is disabled for the current identity.
    pub access_locked: bool,
    pub refresh_active: bool,
}

/// How adopting an identity treats its lockout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockoutReset {
    /// Fresh sign-in: lift the lockout of the adopted identity.
    Always,
    /// Selection among cached identities: lockouts are kept.
    Keep,
}

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    prompt: Arc<dyn IdentityPrompt>,
    events: EventHub,
    refresh_interval: Duration,
    shutdown: CancellationToken,
    refresh_counters: Arc<RefreshCounters>,
    state: RwLock<SessionState>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        prompt: Arc<dyn IdentityPrompt>,
        events: EventHub,
        refresh_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            provider,
            prompt,
            events,
            refresh_interval,
            shutdown,
            refresh_counters: Arc::new(RefreshCounters::default()),
            state: RwLock::new(SessionState {
                phase: SessionPhase::Uninitialized,
                current_identity_key: None,
                refresh: None,
                locked_identities: HashSet::new(),
                init_error: None,
            }),
        }
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    pub fn current_identity_key(&self) -> Option<String> {
        self.state.read().current_identity_key.clone()
    }

    /// The current identity, re-read from the provider's cache by key.
    pub fn current_identity(&self) -> Option<Identity> {
        let key = self.current_identity_key()?;
        self.provider.identity_by_key(&key)
    }

    pub fn is_locked_out(&self) -> bool {
        self.state.read().is_locked_out()
    }

    pub fn refresh_stats(&self) -> RefreshStats {
        self.refresh_counters.snapshot()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let (phase, identity, access_locked, refresh_active) = {
            let st = self.state.read();
            (
                st.phase,
                st.current_identity_key.clone(),
                st.is_locked_out(),
                st.refresh.as_ref().is_some_and(RefreshHandle::is_active),
            )
        };
        let display_name = identity
            .as_deref()
            .and_then(|key| self.provider.identity_by_key(key))
            .and_then(|id| id.display_name);
        SessionSnapshot { phase, identity, display_name, access_locked, refresh_active }
    }

    /// Set up the provider, complete any pending redirect, and resolve the
    /// current identity. Failures are fatal for the session's lifetime.
    pub async fn initialize(&self) -> Result<Outcome, PanelError> {
        {
            let mut st = self.state.write();
            match st.phase {
                SessionPhase::Uninitialized => st.phase = SessionPhase::Initializing,
                SessionPhase::Error => {
                    return Err(PanelError::InitializationFailed(
                        st.init_error.clone().unwrap_or_default(),
                    ))
                }
                _ => {
                    tracing::debug!("session already initialized");
                    return Ok(Outcome::Completed);
                }
            }
        }

        if let Err(e) = self.provider.initialize().await {
            return Err(self.fail_initialization(&e.to_string()));
        }

        let redirect = match self.provider.handle_pending_redirect().await {
            Ok(redirect) => redirect,
            Err(e) if e.is_cancelled() => {
                tracing::info!("pending redirect was cancelled by the user");
                None
            }
            Err(e) => return Err(self.fail_initialization(&e.to_string())),
        };

        self.state.write().phase = SessionPhase::SignedOut;
        match redirect {
            Some(identity) => {
                tracing::info!(identity = %identity.unique_name, "adopting identity from redirect response");
                self.adopt(&identity, LockoutReset::Always);
                Ok(Outcome::Completed)
            }
            None => self.resolve_current_identity().await,
        }
    }

    fn fail_initialization(&self, cause: &str) -> PanelError {
        let handle = {
            let mut st = self.state.write();
            st.phase = SessionPhase::Error;
            st.init_error = Some(cause.to_owned());
            st.current_identity_key = None;
            st.refresh.take()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        tracing::error!(err = %cause, "session initialization failed");
        let err = PanelError::InitializationFailed(cause.to_owned());
        self.events.error(&err);
        err
    }

    /// Reconcile the current identity with the provider's cache.
    ///
    /// No identities signs out, one is adopted, several prompt the agent once.
    /// A cancelled prompt leaves the prior state unchanged.
    pub async fn resolve_current_identity(&self) -> Result<Outcome, PanelError> {
        self.state.read().check_ready()?;
        let identities = self.provider.all_identities();
        match identities.as_slice() {
            [] => {
                self.enter_signed_out(false);
                Ok(Outcome::Completed)
            }
            [only] => {
                self.adopt(only, LockoutReset::Keep);
                Ok(Outcome::Completed)
            }
            _ => self.disambiguate(&identities).await,
        }
    }

    /// Interactive sign-in. On failure the prior state is kept.
    pub async fn sign_in(&self) -> Result<Outcome, PanelError> {
        self.state.read().check_ready()?;
        self.events.status("Signing in with popup...");
        match self.provider.sign_in_popup(LOGIN_SCOPES).await {
            Ok(SignInResult { identity, token }) => {
                drop(token);
                tracing::info!(identity = %identity.unique_name, "sign-in completed");
                self.adopt(&identity, LockoutReset::Always);
                Ok(Outcome::Completed)
            }
            Err(e) if e.is_cancelled() => {
                tracing::info!("sign-in cancelled by user");
                Ok(Outcome::Cancelled)
            }
            Err(e) => {
                tracing::warn!(err = %e, "sign-in failed");
                let err = PanelError::InteractionFailed(format!("sign-in failed: {e}"));
                self.events.error(&err);
                Err(err)
            }
        }
    }

    /// Interactive sign-out of the current identity.
    ///
    /// Success clears the identity and the lockout and cancels the refresh
    /// task. Failure or cancellation leaves state unchanged. In every case the
    /// remaining cached identities are reconciled afterwards.
    pub async fn sign_out(&self) -> Result<Outcome, PanelError> {
        self.state.read().check_ready()?;
        let Some(key) = self.current_identity_key() else {
            return Err(PanelError::NoIdentity);
        };

        let result = match self.provider.identity_by_key(&key) {
            None => {
                tracing::info!(identity = %key, "current identity no longer cached, clearing session");
                self.enter_signed_out(true);
                Ok(Outcome::Completed)
            }
            Some(identity) => {
                self.events.status("Signing out...");
                match self.provider.sign_out_popup(&identity).await {
                    Ok(()) => {
                        tracing::info!(identity = %key, "sign-out completed");
                        self.enter_signed_out(true);
                        self.events.status("Signed out successfully");
                        Ok(Outcome::Completed)
                    }
                    Err(e) if e.is_cancelled() => {
                        tracing::info!(identity = %key, "sign-out cancelled by user");
                        Ok(Outcome::Cancelled)
                    }
                    Err(e) => {
                        tracing::warn!(identity = %key, err = %e, "sign-out failed");
                        let err = PanelError::InteractionFailed(format!("sign-out failed: {e}"));
                        self.events.error(&err);
                        Err(err)
                    }
                }
            }
        };

        if !self.provider.all_identities().is_empty() {
            if let Err(e) = self.resolve_current_identity().await {
                tracing::warn!(err = %e, "identity reconciliation after sign-out failed");
            }
        }
        result
    }

    /// Let the agent pick among cached identities. A single cached identity is
    /// adopted without a prompt.
    pub async fn switch_identity(&self) -> Result<Outcome, PanelError> {
        self.state.read().check_ready()?;
        let identities = self.provider.all_identities();
        match identities.as_slice() {
            [] => {
                self.events.status("No accounts are currently signed in.");
                Err(PanelError::NoIdentity)
            }
            [only] => {
                self.adopt(only, LockoutReset::Keep);
                Ok(Outcome::Completed)
            }
            _ => self.disambiguate(&identities).await,
        }
    }

    /// Cancel the refresh task and stop starting new ones. Called when the
    /// host is about to unload.
    pub fn teardown(&self) {
        let handle = self.state.write().refresh.take();
        if let Some(handle) = handle {
            handle.cancel();
        }
        self.shutdown.cancel();
        tracing::info!("session torn down");
    }

    /// Check-then-act for the protected call: returns the identity key to
    /// use, or fails when signed out or locked out. Runs under one guard.
    pub(crate) fn begin_protected(&self) -> Result<String, PanelError> {
        let st = self.state.read();
        st.check_ready()?;
        let key = st.current_identity_key.clone().ok_or(PanelError::NoIdentity)?;
        if st.locked_identities.contains(&key) {
            return Err(PanelError::PermissionDenied);
        }
        Ok(key)
    }

    /// Record an authorization denial observed for `key`.
    pub(crate) fn record_denial(&self, key: &str) {
        self.state.write().locked_identities.insert(key.to_owned());
        tracing::warn!(identity = %key, "protected call denied, locking out until next sign-in");
        self.events.emit(PanelEvent::AccessLocked { identity: key.to_owned() });
    }

    async fn disambiguate(&self, candidates: &[Identity]) -> Result<Outcome, PanelError> {
        let prior = {
            let mut st = self.state.write();
            let prior = st.phase;
            st.phase = SessionPhase::AwaitingDisambiguation;
            prior
        };

        let choice = self.prompt.choose(candidates).await;
        let chosen = choice
            .and_then(|c| candidates.iter().find(|id| id.unique_name == c.unique_name).cloned());

        match chosen {
            Some(identity) => {
                self.adopt(&identity, LockoutReset::Keep);
                self.events.status(format!("Switched to account: {}", identity.label()));
                Ok(Outcome::Completed)
            }
            None => {
                let mut st = self.state.write();
                if st.phase == SessionPhase::AwaitingDisambiguation {
                    st.phase = prior;
                }
                tracing::info!("no identity selected, keeping current state");
                Ok(Outcome::Cancelled)
            }
        }
    }

    fn adopt(&self, identity: &Identity, reset: LockoutReset) {
        let key = identity.unique_name.clone();
        {
            let mut st = self.state.write();
            let changed = st.current_identity_key.as_deref() != Some(key.as_str());
            if reset == LockoutReset::Always {
                st.locked_identities.remove(&key);
            }
            st.current_identity_key = Some(key.clone());
            st.phase = SessionPhase::SignedIn;

            let refresh_running = st.refresh.as_ref().is_some_and(RefreshHandle::is_active);
            if (changed || !refresh_running) && !self.shutdown.is_cancelled() {
                if let Some(previous) = st.refresh.take() {
                    previous.cancel();
                }
                st.refresh = Some(spawn_refresh_task(
                    Arc::clone(&self.provider),
                    key.clone(),
                    self.refresh_interval,
                    self.shutdown.child_token(),
                    Arc::clone(&self.refresh_counters),
                    self.events.clone(),
                ));
            }
        }

        tracing::info!(identity = %key, "identity adopted");
        self.events.emit(PanelEvent::SignedIn {
            identity: key,
            display_name: identity.display_name.clone(),
        });
    }

    fn enter_signed_out(&self, clear_lockout: bool) {
        let handle = {
            let mut st = self.state.write();
            st.current_identity_key = None;
            st.phase = SessionPhase::SignedOut;
            if clear_lockout {
                st.locked_identities.clear();
            }
            st.refresh.take()
        };
        if let Some(handle) = handle {
            handle.cancel();
        }
        self.events.emit(PanelEvent::SignedOut);
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
