// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::events::{spawn_guarded, EventHub};
use crate::gate;
use crate::identity::{IdentityProvider, TOKEN_SCOPES};

/// Lifetime counters across all refresh tasks of one session.
#[derive(Debug, Default)]
pub struct RefreshCounters {
    started: AtomicU32,
    cancelled: AtomicU32,
    attempts: AtomicU32,
}

impl RefreshCounters {
    pub fn snapshot(&self) -> RefreshStats {
        RefreshStats {
            started: self.started.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RefreshStats {
    pub started: u32,
    pub cancelled: u32,
    /// Acquisition attempts made by refresh ticks.
    pub attempts: u32,
}

/// Handle to a running refresh task bound to one identity.
pub struct RefreshHandle {
    identity: String,
    cancel: CancellationToken,
    counters: Arc<RefreshCounters>,
}

impl RefreshHandle {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop the task. Idempotent; only the first call is counted.
    pub fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(identity = %self.identity, "refresh task cancelled");
    }
}

/// Spawn a task that re-acquires a token for `identity_key` every `period`.
///
/// The first attempt happens one full period after spawn. Failures are
/// logged at debug and swallowed; the next tick retries. A panicking provider
/// surfaces as an error event on `events`.
pub fn spawn_refresh_task(
    provider: Arc<dyn IdentityProvider>,
    identity_key: String,
    period: Duration,
    cancel: CancellationToken,
    counters: Arc<RefreshCounters>,
    events: EventHub,
) -> RefreshHandle {
    counters.started.fetch_add(1, Ordering::Relaxed);
    let task_cancel = cancel.clone();
    let task_counters = Arc::clone(&counters);
    let key = identity_key.clone();

    spawn_guarded(events, "token-refresh", async move {
        let mut timer = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => break,
                _ = timer.tick() => {}
            }
            let Some(identity) = provider.identity_by_key(&key) else {
                tracing::debug!(identity = %key, "identity no longer cached, skipping refresh");
                continue;
            };
            task_counters.attempts.fetch_add(1, Ordering::Relaxed);
            match gate::acquire(provider.as_ref(), Some(&identity), TOKEN_SCOPES).await {
                Ok(_) => tracing::debug!(identity = %key, "background token refresh succeeded"),
                Err(e) => tracing::debug!(identity = %key, err = %e, "background token refresh failed"),
            }
        }
        Ok(())
    });

    RefreshHandle { identity: identity_key, cancel, counters }
}
