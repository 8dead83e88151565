// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use super::*;
use crate::events::EventHub;
use crate::identity::{AccessToken, ProviderError, ProviderErrorKind, TokenRequest};
use crate::test_support::{identity, MockPrompt, MockProvider};

const REFRESH: Duration = Duration::from_secs(60);

struct Fixture {
    session: SessionManager,
    provider: Arc<MockProvider>,
    prompt: Arc<MockPrompt>,
    events: broadcast::Receiver<PanelEvent>,
}

fn fixture(keys: &[&str]) -> Fixture {
    let provider = Arc::new(MockProvider::with_identities(keys.iter().map(|k| identity(k)).collect()));
    let prompt = Arc::new(MockPrompt::new());
    let hub = EventHub::new();
    let events = hub.subscribe();
    let session = SessionManager::new(
        provider.clone(),
        prompt.clone(),
        hub,
        REFRESH,
        CancellationToken::new(),
    );
    Fixture { session, provider, prompt, events }
}

fn drain(rx: &mut broadcast::Receiver<PanelEvent>) -> Vec<PanelEvent> {
    let mut out = vec![];
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn cancelled() -> ProviderError {
    ProviderError::new(ProviderErrorKind::UserCancelled, "popup closed")
}

#[tokio::test]
async fn operations_before_initialize_fail() {
    let f = fixture(&["a@x.com"]);
    assert_eq!(f.session.sign_in().await, Err(PanelError::NotInitialized));
    assert_eq!(f.session.resolve_current_identity().await, Err(PanelError::NotInitialized));
    assert_eq!(f.session.phase(), SessionPhase::Uninitialized);
}

#[tokio::test]
async fn empty_cache_signs_out_without_prompt() -> anyhow::Result<()> {
    let f = fixture(&[]);
    assert_eq!(f.session.initialize().await?, Outcome::Completed);

    let snap = f.session.snapshot();
    assert_eq!(snap.phase, SessionPhase::SignedOut);
    assert_eq!(snap.identity, None);
    assert!(!snap.refresh_active);
    assert_eq!(f.prompt.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn single_identity_is_adopted_without_prompt() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;

    let snap = f.session.snapshot();
    assert_eq!(snap.phase, SessionPhase::SignedIn);
    assert_eq!(snap.identity.as_deref(), Some("a@x.com"));
    assert!(snap.refresh_active);
    assert_eq!(f.prompt.calls(), 0);
    assert_eq!(f.session.refresh_stats().started, 1);
    Ok(())
}

#[tokio::test]
async fn several_identities_prompt_exactly_once() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.choose_next("b@x.com");
    f.session.initialize().await?;

    assert_eq!(f.prompt.calls(), 1);
    assert_eq!(f.prompt.last_candidates(), vec!["a@x.com", "b@x.com"]);
    assert_eq!(f.session.current_identity_key().as_deref(), Some("b@x.com"));
    assert_eq!(f.session.phase(), SessionPhase::SignedIn);
    Ok(())
}

#[tokio::test]
async fn cancelled_prompt_during_initialize_stays_signed_out() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.cancel_next();
    assert_eq!(f.session.initialize().await?, Outcome::Cancelled);

    assert_eq!(f.prompt.calls(), 1);
    assert_eq!(f.session.phase(), SessionPhase::SignedOut);
    assert_eq!(f.session.current_identity_key(), None);
    Ok(())
}

#[tokio::test]
async fn cancelled_prompt_keeps_prior_identity() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    f.provider.set_identities(vec![identity("a@x.com"), identity("b@x.com")]);

    f.prompt.cancel_next();
    assert_eq!(f.session.resolve_current_identity().await?, Outcome::Cancelled);

    let snap = f.session.snapshot();
    assert_eq!(snap.phase, SessionPhase::SignedIn);
    assert_eq!(snap.identity.as_deref(), Some("a@x.com"));
    assert_eq!(f.session.refresh_stats().started, 1);
    Ok(())
}

#[tokio::test]
async fn pending_redirect_identity_wins() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.provider.pending_redirect(Ok(identity("b@x.com")));
    f.session.initialize().await?;

    assert_eq!(f.session.current_identity_key().as_deref(), Some("b@x.com"));
    assert_eq!(f.prompt.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn initialization_failure_is_terminal() {
    let mut f = fixture(&["a@x.com"]);
    f.provider.fail_initialize(ProviderError::new(ProviderErrorKind::Other, "bad client id"));

    let err = f.session.initialize().await;
    assert!(matches!(err, Err(PanelError::InitializationFailed(ref m)) if m.contains("bad client id")));
    assert_eq!(f.session.phase(), SessionPhase::Error);

    assert!(matches!(f.session.initialize().await, Err(PanelError::InitializationFailed(_))));
    assert!(matches!(f.session.sign_in().await, Err(PanelError::InitializationFailed(_))));
    assert_eq!(f.provider.calls().initialize, 1);
    assert_eq!(f.provider.calls().sign_in, 0);

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PanelEvent::Error { code, .. } if code == "INITIALIZATION_FAILED")));
}

#[tokio::test]
async fn redirect_failure_is_fatal() {
    let f = fixture(&[]);
    f.provider.pending_redirect(Err(ProviderError::new(ProviderErrorKind::Other, "state mismatch")));
    assert!(matches!(f.session.initialize().await, Err(PanelError::InitializationFailed(_))));
    assert_eq!(f.session.phase(), SessionPhase::Error);
}

#[tokio::test]
async fn sign_in_adopts_identity_and_clears_lockout() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    f.session.record_denial("a@x.com");
    assert!(f.session.is_locked_out());

    f.provider.script_sign_in(Ok(identity("a@x.com")));
    assert_eq!(f.session.sign_in().await?, Outcome::Completed);

    assert!(!f.session.is_locked_out());
    assert_eq!(f.session.phase(), SessionPhase::SignedIn);
    Ok(())
}

#[tokio::test]
async fn sign_in_from_signed_out() -> anyhow::Result<()> {
    let mut f = fixture(&[]);
    f.session.initialize().await?;
    drain(&mut f.events);

    f.provider.script_sign_in(Ok(identity("a@x.com").with_display_name("Ada")));
    f.session.sign_in().await?;

    let snap = f.session.snapshot();
    assert_eq!(snap.identity.as_deref(), Some("a@x.com"));
    assert_eq!(snap.display_name.as_deref(), Some("Ada"));
    assert!(drain(&mut f.events).contains(&PanelEvent::SignedIn {
        identity: "a@x.com".to_owned(),
        display_name: Some("Ada".to_owned()),
    }));
    Ok(())
}

#[tokio::test]
async fn cancelled_sign_in_changes_nothing() -> anyhow::Result<()> {
    let mut f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    let before = f.session.snapshot();
    drain(&mut f.events);

    f.provider.script_sign_in(Err(cancelled()));
    assert_eq!(f.session.sign_in().await?, Outcome::Cancelled);

    assert_eq!(f.session.snapshot(), before);
    assert!(!drain(&mut f.events).iter().any(|e| matches!(e, PanelEvent::Error { .. })));
    Ok(())
}

#[tokio::test]
async fn failed_sign_in_reports_and_keeps_state() -> anyhow::Result<()> {
    let mut f = fixture(&[]);
    f.session.initialize().await?;
    drain(&mut f.events);

    f.provider.script_sign_in(Err(ProviderError::new(ProviderErrorKind::Other, "popup blocked")));
    let err = f.session.sign_in().await;
    assert!(matches!(err, Err(PanelError::InteractionFailed(ref m)) if m.contains("popup blocked")));
    assert_eq!(f.session.phase(), SessionPhase::SignedOut);

    let events = drain(&mut f.events);
    assert!(events
        .iter()
        .any(|e| matches!(e, PanelEvent::Error { code, .. } if code == "INTERACTION_FAILED")));
    Ok(())
}

#[tokio::test]
async fn sign_out_clears_lockout_and_cancels_refresh_once() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    f.session.record_denial("a@x.com");

    assert_eq!(f.session.sign_out().await?, Outcome::Completed);

    let snap = f.session.snapshot();
    assert_eq!(snap.phase, SessionPhase::SignedOut);
    assert_eq!(snap.identity, None);
    assert!(!snap.access_locked);
    assert!(!snap.refresh_active);
    assert_eq!(f.session.refresh_stats().cancelled, 1);

    f.session.teardown();
    assert_eq!(f.session.refresh_stats().cancelled, 1);
    Ok(())
}

#[tokio::test]
async fn sign_out_without_identity_fails() -> anyhow::Result<()> {
    let f = fixture(&[]);
    f.session.initialize().await?;
    assert_eq!(f.session.sign_out().await, Err(PanelError::NoIdentity));
    assert_eq!(f.provider.calls().sign_out, 0);
    Ok(())
}

#[tokio::test]
async fn failed_sign_out_keeps_identity() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    f.session.record_denial("a@x.com");

    f.provider.script_sign_out(Err(ProviderError::new(ProviderErrorKind::Other, "network")));
    assert!(matches!(f.session.sign_out().await, Err(PanelError::InteractionFailed(_))));

    let snap = f.session.snapshot();
    assert_eq!(snap.identity.as_deref(), Some("a@x.com"));
    assert!(snap.access_locked);
    assert!(snap.refresh_active);
    assert_eq!(f.session.refresh_stats().started, 1);
    assert_eq!(f.session.refresh_stats().cancelled, 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_sign_out_keeps_identity() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    f.provider.script_sign_out(Err(cancelled()));
    assert_eq!(f.session.sign_out().await?, Outcome::Cancelled);
    assert_eq!(f.session.current_identity_key().as_deref(), Some("a@x.com"));
    Ok(())
}

#[tokio::test]
async fn sign_out_adopts_remaining_cached_identity() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.choose_next("a@x.com");
    f.session.initialize().await?;

    f.session.sign_out().await?;

    assert_eq!(f.session.current_identity_key().as_deref(), Some("b@x.com"));
    assert_eq!(f.session.phase(), SessionPhase::SignedIn);
    assert_eq!(f.prompt.calls(), 1);
    Ok(())
}

#[tokio::test]
async fn switching_between_two_identities() -> anyhow::Result<()> {
    let mut f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.choose_next("a@x.com");
    f.session.initialize().await?;
    drain(&mut f.events);

    f.prompt.choose_next("b@x.com");
    assert_eq!(f.session.switch_identity().await?, Outcome::Completed);
    assert_eq!(f.session.current_identity_key().as_deref(), Some("b@x.com"));
    f.session.record_denial("b@x.com");
    assert!(f.session.is_locked_out());

    f.prompt.choose_next("a@x.com");
    f.session.switch_identity().await?;
    assert_eq!(f.session.current_identity_key().as_deref(), Some("a@x.com"));
    assert!(!f.session.is_locked_out());

    let stats = f.session.refresh_stats();
    assert_eq!(stats.started, 3);
    assert_eq!(stats.cancelled, 2);
    assert!(drain(&mut f.events).contains(&PanelEvent::Status {
        message: "Switched to account: b@x.com".to_owned()
    }));
    Ok(())
}

#[tokio::test]
async fn switch_with_single_identity_skips_prompt() -> anyhow::Result<()> {
    let f = fixture(&[]);
    f.session.initialize().await?;
    f.provider.set_identities(vec![identity("a@x.com")]);

    assert_eq!(f.session.switch_identity().await?, Outcome::Completed);
    assert_eq!(f.session.current_identity_key().as_deref(), Some("a@x.com"));
    assert_eq!(f.prompt.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn switch_with_empty_cache_reports_no_identity() -> anyhow::Result<()> {
    let f = fixture(&[]);
    f.session.initialize().await?;
    assert_eq!(f.session.switch_identity().await, Err(PanelError::NoIdentity));
    Ok(())
}

#[tokio::test]
async fn cancelled_switch_is_noop() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.choose_next("a@x.com");
    f.session.initialize().await?;
    let before = f.session.snapshot();

    f.prompt.cancel_next();
    assert_eq!(f.session.switch_identity().await?, Outcome::Cancelled);
    assert_eq!(f.session.snapshot(), before);
    Ok(())
}

#[tokio::test]
async fn lockout_is_scoped_to_the_denied_identity() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.choose_next("a@x.com");
    f.session.initialize().await?;
    f.session.record_denial("a@x.com");

    f.prompt.choose_next("a@x.com");
    f.session.switch_identity().await?;
    assert!(f.session.is_locked_out(), "re-selecting the denied identity keeps the lockout");

    f.prompt.choose_next("b@x.com");
    f.session.switch_identity().await?;
    assert!(!f.session.is_locked_out());

    f.prompt.choose_next("a@x.com");
    f.session.switch_identity().await?;
    assert!(f.session.is_locked_out(), "switching away and back keeps the lockout");
    assert_eq!(f.session.begin_protected(), Err(PanelError::PermissionDenied));

    f.provider.script_sign_in(Ok(identity("a@x.com")));
    f.session.sign_in().await?;
    assert!(!f.session.is_locked_out());
    Ok(())
}

#[tokio::test]
async fn fresh_sign_in_lifts_only_its_own_lockout() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.choose_next("a@x.com");
    f.session.initialize().await?;
    f.session.record_denial("a@x.com");
    f.session.record_denial("b@x.com");

    f.provider.script_sign_in(Ok(identity("b@x.com")));
    f.session.sign_in().await?;
    assert!(!f.session.is_locked_out());

    f.prompt.choose_next("a@x.com");
    f.session.switch_identity().await?;
    assert!(f.session.is_locked_out());
    Ok(())
}

#[tokio::test]
async fn switching_replaces_the_refresh_task() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com", "b@x.com"]);
    f.prompt.choose_next("a@x.com");
    f.session.initialize().await?;

    f.prompt.choose_next("b@x.com");
    f.session.switch_identity().await?;
    let stats = f.session.refresh_stats();
    assert_eq!(stats.started, 2);
    assert_eq!(stats.cancelled, 1);
    assert!(f.session.snapshot().refresh_active);
    Ok(())
}

#[tokio::test]
async fn teardown_stops_refresh_for_good() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;

    f.session.teardown();
    assert!(!f.session.snapshot().refresh_active);
    assert_eq!(f.session.refresh_stats().cancelled, 1);

    f.provider.set_identities(vec![identity("b@x.com")]);
    f.session.resolve_current_identity().await?;
    assert_eq!(f.session.current_identity_key().as_deref(), Some("b@x.com"));
    assert!(!f.session.snapshot().refresh_active);
    assert_eq!(f.session.refresh_stats().started, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_first_attempt_waits_a_full_period() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    assert_eq!(f.provider.calls().silent, 0);

    tokio::time::sleep(REFRESH - Duration::from_secs(1)).await;
    assert_eq!(f.provider.calls().silent, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    tokio::task::yield_now().await;
    assert_eq!(f.provider.calls().silent, 1);
    assert_eq!(f.session.refresh_stats().attempts, 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_failures_are_swallowed() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    f.provider.script_silent(Err(ProviderError::new(ProviderErrorKind::InteractionRequired, "expired")));
    f.provider.script_interactive(Err(ProviderError::new(ProviderErrorKind::Other, "blocked")));

    tokio::time::sleep(REFRESH * 2 + Duration::from_secs(1)).await;
    tokio::task::yield_now().await;

    assert_eq!(f.session.refresh_stats().attempts, 2);
    assert_eq!(f.session.phase(), SessionPhase::SignedIn);
    assert!(f.session.snapshot().refresh_active);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refresh_stops_after_sign_out() -> anyhow::Result<()> {
    let f = fixture(&["a@x.com"]);
    f.session.initialize().await?;
    f.session.sign_out().await?;

    tokio::time::sleep(REFRESH * 3).await;
    tokio::task::yield_now().await;
    assert_eq!(f.provider.calls().silent, 0);
    Ok(())
}

/// Provider whose silent acquisition panics; everything else is the mock.
struct PanickingProvider(MockProvider);

impl IdentityProvider for PanickingProvider {
    fn initialize(&self) -> BoxFuture<'_, Result<(), ProviderError>> {
        self.0.initialize()
    }

    fn handle_pending_redirect(&self) -> BoxFuture<'_, Result<Option<Identity>, ProviderError>> {
        self.0.handle_pending_redirect()
    }

    fn all_identities(&self) -> Vec<Identity> {
        self.0.all_identities()
    }

    fn identity_by_key(&self, unique_name: &str) -> Option<Identity> {
        self.0.identity_by_key(unique_name)
    }

    #[allow(clippy::panic)]
    fn acquire_silent<'a>(
        &'a self,
        _request: TokenRequest<'a>,
    ) -> BoxFuture<'a, Result<AccessToken, ProviderError>> {
        panic!("token cache corrupted")
    }

    fn acquire_interactive<'a>(
        &'a self,
        request: TokenRequest<'a>,
    ) -> BoxFuture<'a, Result<AccessToken, ProviderError>> {
        self.0.acquire_interactive(request)
    }

    fn sign_in_popup<'a>(
        &'a self,
        scopes: &'a [&'a str],
    ) -> BoxFuture<'a, Result<SignInResult, ProviderError>> {
        self.0.sign_in_popup(scopes)
    }

    fn sign_out_popup<'a>(
        &'a self,
        identity: &'a Identity,
    ) -> BoxFuture<'a, Result<(), ProviderError>> {
        self.0.sign_out_popup(identity)
    }
}

#[tokio::test(start_paused = true)]
async fn refresh_panic_becomes_error_event() -> anyhow::Result<()> {
    let provider = Arc::new(PanickingProvider(MockProvider::with_identities(vec![identity(
        "a@x.com",
    )])));
    let hub = EventHub::new();
    let mut events = hub.subscribe();
    let session = SessionManager::new(
        provider,
        Arc::new(MockPrompt::new()),
        hub,
        REFRESH,
        CancellationToken::new(),
    );
    session.initialize().await?;
    drain(&mut events);

    tokio::time::sleep(REFRESH + Duration::from_secs(1)).await;
    tokio::time::sleep(Duration::from_secs(1)).await;

    let codes: Vec<String> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            PanelEvent::Error { code, .. } => Some(code),
            _ => None,
        })
        .collect();
    assert_eq!(codes, vec!["INTERNAL"]);
    Ok(())
}
