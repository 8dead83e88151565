// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted collaborators and a panel builder.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::config::{PanelConfig, PanelSettings};
use crate::directory::DirectoryTransport;
use crate::gate::RemoteFailure;
use crate::identity::{
    AccessToken, Identity, IdentityPrompt, IdentityProvider, ProviderError, ProviderErrorKind,
    SignInResult, TokenRequest,
};
use crate::state::PanelState;
use crate::ticket::{Requester, Ticket, TicketHost, TicketNote};

pub const SILENT_TOKEN: &str = "silent-token";
pub const POPUP_TOKEN: &str = "popup-token";

pub fn identity(key: &str) -> Identity {
    Identity::new(key)
}

pub fn test_config() -> PanelConfig {
    PanelConfig {
        identity_provider_client_id: "client-123".to_owned(),
        directory_tenant_id: "tenant-456".to_owned(),
        host_subdomain: "acme".to_owned(),
    }
}

/// Directory API device entry.
pub fn device_json(name: &str) -> Value {
    json!({
        "id": format!("id-{name}"),
        "deviceName": name,
        "operatingSystem": "Windows",
        "complianceState": "compliant",
    })
}

pub fn device_list(names: &[&str]) -> Value {
    json!({ "value": names.iter().map(|n| device_json(n)).collect::<Vec<_>>() })
}

/// Extension trait to convert any `Display` error into `anyhow::Error`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

// -- Identity provider --------------------------------------------------------

#[derive(Default)]
struct ProviderScript {
    identities: Vec<Identity>,
    init_failure: Option<ProviderError>,
    redirect: Option<Result<Identity, ProviderError>>,
    silent: VecDeque<Result<String, ProviderError>>,
    interactive: VecDeque<Result<String, ProviderError>>,
    sign_in: VecDeque<Result<Identity, ProviderError>>,
    sign_out: VecDeque<Result<(), ProviderError>>,
}

/// Call counts observed by [`MockProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProviderCalls {
    pub initialize: u32,
    pub silent: u32,
    pub interactive: u32,
    pub sign_in: u32,
    pub sign_out: u32,
}

/// Scripted identity provider. Unscripted acquisitions succeed; unscripted
/// sign-ins fail. Successful sign-in adds to the cache, sign-out removes.
#[derive(Default)]
pub struct MockProvider {
    script: Mutex<ProviderScript>,
    initialize: AtomicU32,
    silent: AtomicU32,
    interactive: AtomicU32,
    sign_in: AtomicU32,
    sign_out: AtomicU32,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identities(identities: Vec<Identity>) -> Self {
        let provider = Self::new();
        provider.set_identities(identities);
        provider
    }

    pub fn set_identities(&self, identities: Vec<Identity>) {
        self.script.lock().identities = identities;
    }

    pub fn fail_initialize(&self, err: ProviderError) {
        self.script.lock().init_failure = Some(err);
    }

    pub fn pending_redirect(&self, result: Result<Identity, ProviderError>) {
        self.script.lock().redirect = Some(result);
    }

    pub fn script_silent(&self, result: Result<&str, ProviderError>) {
        self.script.lock().silent.push_back(result.map(str::to_owned));
    }

    pub fn script_interactive(&self, result: Result<&str, ProviderError>) {
        self.script.lock().interactive.push_back(result.map(str::to_owned));
    }

    pub fn script_sign_in(&self, result: Result<Identity, ProviderError>) {
        self.script.lock().sign_in.push_back(result);
    }

    pub fn script_sign_out(&self, result: Result<(), ProviderError>) {
        self.script.lock().sign_out.push_back(result);
    }

    pub fn calls(&self) -> ProviderCalls {
        ProviderCalls {
            initialize: self.initialize.load(Ordering::Relaxed),
            silent: self.silent.load(Ordering::Relaxed),
            interactive: self.interactive.load(Ordering::Relaxed),
            sign_in: self.sign_in.load(Ordering::Relaxed),
            sign_out: self.sign_out.load(Ordering::Relaxed),
        }
    }
}

impl IdentityProvider for MockProvider {
    fn initialize(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        self.initialize.fetch_add(1, Ordering::Relaxed);
        let result = match self.script.lock().init_failure.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        Box::pin(async move { result })
    }

    fn handle_pending_redirect(&self) -> BoxFuture<'_, Result<Option<Identity>, ProviderError>> {
        let result = {
            let mut script = self.script.lock();
            match script.redirect.take() {
                Some(Ok(identity)) => {
                    if !script.identities.contains(&identity) {
                        script.identities.push(identity.clone());
                    }
                    Ok(Some(identity))
                }
                Some(Err(err)) => Err(err),
                None => Ok(None),
            }
        };
        Box::pin(async move { result })
    }

    fn all_identities(&self) -> Vec<Identity> {
        self.script.lock().identities.clone()
    }

    fn identity_by_key(&self, unique_name: &str) -> Option<Identity> {
        self.script.lock().identities.iter().find(|id| id.unique_name == unique_name).cloned()
    }

    fn acquire_silent<'a>(
        &'a self,
        _request: TokenRequest<'a>,
    ) -> BoxFuture<'a, Result<AccessToken, ProviderError>> {
        self.silent.fetch_add(1, Ordering::Relaxed);
        let next = self.script.lock().silent.pop_front();
        let result = next.unwrap_or_else(|| Ok(SILENT_TOKEN.to_owned())).map(AccessToken::new);
        Box::pin(async move { result })
    }

    fn acquire_interactive<'a>(
        &'a self,
        _request: TokenRequest<'a>,
    ) -> BoxFuture<'a, Result<AccessToken, ProviderError>> {
        self.interactive.fetch_add(1, Ordering::Relaxed);
        let next = self.script.lock().interactive.pop_front();
        let result = next.unwrap_or_else(|| Ok(POPUP_TOKEN.to_owned())).map(AccessToken::new);
        Box::pin(async move { result })
    }

    fn sign_in_popup<'a>(
        &'a self,
        _scopes: &'a [&'a str],
    ) -> BoxFuture<'a, Result<SignInResult, ProviderError>> {
        self.sign_in.fetch_add(1, Ordering::Relaxed);
        let result = {
            let mut script = self.script.lock();
            match script.sign_in.pop_front() {
                Some(Ok(identity)) => {
                    if !script.identities.contains(&identity) {
                        script.identities.push(identity.clone());
                    }
                    Ok(SignInResult { identity, token: AccessToken::new(POPUP_TOKEN) })
                }
                Some(Err(err)) => Err(err),
                None => Err(ProviderError::new(ProviderErrorKind::Other, "no scripted sign-in")),
            }
        };
        Box::pin(async move { result })
    }

    fn sign_out_popup<'a>(
        &'a self,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        self.sign_out.fetch_add(1, Ordering::Relaxed);
        let result = {
            let mut script = self.script.lock();
            let result = script.sign_out.pop_front().unwrap_or(Ok(()));
            if result.is_ok() {
                script.identities.retain(|id| id.unique_name != identity.unique_name);
            }
            result
        };
        Box::pin(async move { result })
    }
}

// -- Identity prompt ----------------------------------------------------------

/// Scripted account picker. Each `choose` pops one scripted answer; an
/// exhausted script cancels.
#[derive(Default)]
pub struct MockPrompt {
    choices: Mutex<VecDeque<Option<String>>>,
    calls: AtomicU32,
    last_candidates: Mutex<Vec<String>>,
}

impl MockPrompt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next prompt with the identity keyed `key`.
    pub fn choose_next(&self, key: &str) {
        self.choices.lock().push_back(Some(key.to_owned()));
    }

    /// Dismiss the next prompt.
    pub fn cancel_next(&self) {
        self.choices.lock().push_back(None);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn last_candidates(&self) -> Vec<String> {
        self.last_candidates.lock().clone()
    }
}

impl IdentityPrompt for MockPrompt {
    fn choose<'a>(&'a self, candidates: &'a [Identity]) -> BoxFuture<'a, Option<Identity>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_candidates.lock() = candidates.iter().map(|c| c.unique_name.clone()).collect();
        let answer = self.choices.lock().pop_front().flatten();
        let chosen = answer.and_then(|key| candidates.iter().find(|c| c.unique_name == key).cloned());
        Box::pin(async move { chosen })
    }
}

// -- Directory ----------------------------------------------------------------

/// Scripted directory transport. Unscripted calls return an empty list.
#[derive(Default)]
pub struct MockDirectory {
    responses: Mutex<VecDeque<Result<Value, RemoteFailure>>>,
    calls: AtomicU32,
    urls: Mutex<Vec<String>>,
    tokens: Mutex<Vec<String>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, result: Result<Value, RemoteFailure>) {
        self.responses.lock().push_back(result);
    }

    /// Respond with a non-success status and body, classified as the HTTP
    /// transport would.
    pub fn respond_status(&self, status: u16, body: &str) {
        self.respond(Err(RemoteFailure::classify(status, body)));
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().clone()
    }
}

impl DirectoryTransport for Arc<MockDirectory> {
    fn get_json<'a>(
        &'a self,
        url: &'a str,
        token: AccessToken,
    ) -> BoxFuture<'a, Result<Value, RemoteFailure>> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.urls.lock().push(url.to_owned());
        self.tokens.lock().push(token.secret().to_owned());
        let result = self.responses.lock().pop_front().unwrap_or_else(|| Ok(json!({ "value": [] })));
        Box::pin(async move { result })
    }
}

// -- Ticket host --------------------------------------------------------------

pub struct MockTicketHost {
    ticket: Mutex<Option<Ticket>>,
    notes: Mutex<Vec<TicketNote>>,
    fail_notes: AtomicBool,
}

impl MockTicketHost {
    pub fn new(ticket: Ticket) -> Self {
        Self { ticket: Mutex::new(Some(ticket)), notes: Mutex::new(vec![]), fail_notes: AtomicBool::new(false) }
    }

    /// A host with no open ticket.
    pub fn empty() -> Self {
        Self { ticket: Mutex::new(None), notes: Mutex::new(vec![]), fail_notes: AtomicBool::new(false) }
    }

    pub fn set_ticket(&self, ticket: Option<Ticket>) {
        *self.ticket.lock() = ticket;
    }

    pub fn fail_notes(&self) {
        self.fail_notes.store(true, Ordering::Relaxed);
    }

    pub fn notes(&self) -> Vec<TicketNote> {
        self.notes.lock().clone()
    }
}

impl TicketHost for MockTicketHost {
    fn current_ticket(&self) -> BoxFuture<'_, anyhow::Result<Ticket>> {
        let ticket = self.ticket.lock().clone();
        Box::pin(async move { ticket.ok_or_else(|| anyhow::anyhow!("no ticket is open")) })
    }

    fn put_ticket_note(&self, note: TicketNote) -> BoxFuture<'_, anyhow::Result<()>> {
        let result = if self.fail_notes.load(Ordering::Relaxed) {
            Err(anyhow::anyhow!("ticket is closed"))
        } else {
            self.notes.lock().push(note);
            Ok(())
        };
        Box::pin(async move { result })
    }
}

pub fn ticket(id: u64, email: &str, name: Option<&str>) -> Ticket {
    Ticket {
        id,
        requester: Requester { email: email.to_owned(), name: name.map(str::to_owned) },
    }
}

// -- Panel --------------------------------------------------------------------

/// A panel wired to mocks, with handles to each mock.
pub struct TestPanel {
    pub state: Arc<PanelState>,
    pub provider: Arc<MockProvider>,
    pub prompt: Arc<MockPrompt>,
    pub directory: Arc<MockDirectory>,
    pub host: Arc<MockTicketHost>,
}

/// Builder for [`TestPanel`] with sensible defaults.
pub struct PanelBuilder {
    settings: PanelSettings,
    identities: Vec<Identity>,
    ticket: Ticket,
}

impl Default for PanelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelBuilder {
    pub fn new() -> Self {
        Self {
            settings: PanelSettings {
                directory_base_url: "https://directory.test/v1.0".to_owned(),
                ..PanelSettings::default()
            },
            identities: vec![],
            ticket: ticket(42, "requester@x.com", Some("Rita Requester")),
        }
    }

    pub fn identities(mut self, keys: &[&str]) -> Self {
        self.identities = keys.iter().map(|k| identity(k)).collect();
        self
    }

    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.settings.refresh_interval = interval;
        self
    }

    pub fn review_threshold(mut self, threshold: usize) -> Self {
        self.settings.review_threshold = threshold;
        self
    }

    pub fn ticket(mut self, ticket: Ticket) -> Self {
        self.ticket = ticket;
        self
    }

    pub fn build(self) -> TestPanel {
        let provider = Arc::new(MockProvider::with_identities(self.identities));
        let prompt = Arc::new(MockPrompt::new());
        let directory = Arc::new(MockDirectory::new());
        let host = Arc::new(MockTicketHost::new(self.ticket));
        let state = Arc::new(PanelState::new(
            test_config(),
            self.settings,
            Arc::clone(&provider) as Arc<dyn IdentityProvider>,
            Arc::clone(&prompt) as Arc<dyn IdentityPrompt>,
            Arc::clone(&host) as Arc<dyn TicketHost>,
            Box::new(Arc::clone(&directory)),
        ));
        TestPanel { state, provider, prompt, directory, host }
    }
}
