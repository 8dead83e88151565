// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host ticket surface: the open ticket's requester and note posting.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Requester {
    /// Name when present, else the email.
    pub fn label(&self) -> &str {
        self.name.as_deref().filter(|n| !n.trim().is_empty()).unwrap_or(&self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: u64,
    pub requester: Requester,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketNote {
    pub ticket_id: u64,
    pub body: String,
    /// Private notes are visible to agents only.
    #[serde(default)]
    pub is_public: bool,
}

/// The support host. Implemented over the host's app framework client.
pub trait TicketHost: Send + Sync + 'static {
    /// The ticket open in the panel.
    fn current_ticket(&self) -> BoxFuture<'_, anyhow::Result<Ticket>>;

    fn put_ticket_note(&self, note: TicketNote) -> BoxFuture<'_, anyhow::Result<()>>;
}
