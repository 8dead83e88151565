// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{PanelConfig, PanelSettings};
use crate::directory::{DirectoryClient, DirectoryTransport};
use crate::events::{spawn_guarded, EventHub, HostLifecycle, Subscription};
use crate::gate::CredentialGate;
use crate::identity::{IdentityPrompt, IdentityProvider};
use crate::lookup::DeviceLookup;
use crate::session::SessionManager;
use crate::ticket::TicketHost;

/// Shared panel state. One per host page.
pub struct PanelState {
    pub config: PanelConfig,
    pub settings: PanelSettings,
    pub session: Arc<SessionManager>,
    pub gate: CredentialGate,
    pub lookup: DeviceLookup,
    pub events: EventHub,
    pub shutdown: CancellationToken,
}

impl PanelState {
    pub fn new(
        config: PanelConfig,
        settings: PanelSettings,
        provider: Arc<dyn IdentityProvider>,
        prompt: Arc<dyn IdentityPrompt>,
        host: Arc<dyn TicketHost>,
        transport: Box<dyn DirectoryTransport>,
    ) -> Self {
        let events = EventHub::new();
        let shutdown = CancellationToken::new();
        let session = Arc::new(SessionManager::new(
            provider,
            prompt,
            events.clone(),
            settings.refresh_interval,
            shutdown.clone(),
        ));
        let gate = CredentialGate::new(Arc::clone(&session));
        let directory = DirectoryClient::new(settings.directory_base_url.clone(), transport);
        let lookup = DeviceLookup::new(
            gate.clone(),
            directory,
            host,
            events.clone(),
            settings.review_threshold,
        );
        Self { config, settings, session, gate, lookup, events, shutdown }
    }

    /// Run session initialization in the background. Failures surface as
    /// error events.
    pub fn start(&self) -> JoinHandle<()> {
        let session = Arc::clone(&self.session);
        spawn_guarded(self.events.clone(), "initialize", async move {
            session.initialize().await.map(|_| ())
        })
    }

    /// Tear the session down when the host signals unload.
    pub fn watch_lifecycle(&self, lifecycle: HostLifecycle) -> Subscription {
        let cancel = CancellationToken::new();
        let watch = cancel.clone();
        let session = Arc::clone(&self.session);
        spawn_guarded(self.events.clone(), "lifecycle-watch", async move {
            tokio::select! {
                _ = watch.cancelled() => {}
                _ = lifecycle.unloading() => {
                    tracing::info!("host unloading");
                    session.teardown();
                }
            }
            Ok(())
        });
        Subscription::new(cancel)
    }
}
