// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Panel events for the presentation layer, plus the safety net that turns
//! failed background work into an error event instead of a silent hang.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorCode, PanelError};

/// Events consumed by the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PanelEvent {
    /// An identity became current.
    SignedIn {
        identity: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    /// No identity is current.
    SignedOut,
    /// Informational status line.
    Status { message: String },
    /// A failure to surface to the agent.
    Error { code: String, message: String },
    /// The protected action is disabled until the next sign-in.
    AccessLocked { identity: String },
    /// A device lookup completed.
    Devices { ticket_id: u64, count: usize, needs_review: bool },
}

/// Fan-out hub for [`PanelEvent`]s.
#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<PanelEvent>,
}

impl EventHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PanelEvent> {
        self.tx.subscribe()
    }

    /// Send an event. No receivers is not an error.
    pub fn emit(&self, event: PanelEvent) {
        let _ = self.tx.send(event);
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(PanelEvent::Status { message: message.into() });
    }

    /// Emit an error event. Cancellations are not errors and are dropped.
    pub fn error(&self, err: &PanelError) {
        if err.is_cancellation() {
            return;
        }
        self.emit(PanelEvent::Error {
            code: err.code().as_str().to_owned(),
            message: err.to_string(),
        });
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by a registration. Dropping it or calling
/// [`Subscription::unsubscribe`] stops the registered watcher.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Host environment lifecycle. The host calls [`HostLifecycle::signal_unload`]
/// right before the page goes away.
#[derive(Clone, Default)]
pub struct HostLifecycle {
    unload: CancellationToken,
}

impl HostLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal_unload(&self) {
        self.unload.cancel();
    }

    pub fn is_unloading(&self) -> bool {
        self.unload.is_cancelled()
    }

    /// Resolves once the host signals unload.
    pub async fn unloading(&self) {
        self.unload.cancelled().await;
    }
}

/// Spawn fallible background work. An `Err` or a panic becomes a
/// [`PanelEvent::Error`] on `events`.
pub fn spawn_guarded<F>(events: EventHub, task: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = Result<(), PanelError>> + Send + 'static,
{
    let inner = tokio::spawn(fut);
    tokio::spawn(async move {
        match inner.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                if !e.is_cancellation() {
                    tracing::warn!(task, err = %e, "background task failed");
                }
                events.error(&e);
            }
            Err(join) => {
                tracing::error!(task, err = %join, "background task aborted");
                events.emit(PanelEvent::Error {
                    code: ErrorCode::Internal.as_str().to_owned(),
                    message: format!("Unexpected error: {join}"),
                });
            }
        }
    })
}
