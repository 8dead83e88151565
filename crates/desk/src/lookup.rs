// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device lookup for the requester of the open ticket.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::directory::{DirectoryClient, ManagedDevice};
use crate::error::PanelError;
use crate::events::{EventHub, PanelEvent};
use crate::gate::CredentialGate;
use crate::identity::TOKEN_SCOPES;
use crate::ticket::{Requester, TicketHost, TicketNote};

/// Devices found for a ticket's requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceReport {
    pub ticket_id: u64,
    pub requester: Requester,
    pub devices: Vec<ManagedDevice>,
    /// More devices than the review threshold.
    pub needs_review: bool,
}

impl DeviceReport {
    /// One-line status shown to the agent.
    pub fn summary(&self) -> String {
        match self.devices.len() {
            0 => format!("No devices found for {}", self.requester.label()),
            n => format!("Found {n} device(s) for {}", self.requester.label()),
        }
    }
}

pub struct DeviceLookup {
    gate: CredentialGate,
    directory: DirectoryClient,
    host: Arc<dyn TicketHost>,
    events: EventHub,
    review_threshold: usize,
}

impl DeviceLookup {
    pub fn new(
        gate: CredentialGate,
        directory: DirectoryClient,
        host: Arc<dyn TicketHost>,
        events: EventHub,
        review_threshold: usize,
    ) -> Self {
        Self { gate, directory, host, events, review_threshold }
    }

    /// Query the directory for the current ticket's requester.
    pub async fn fetch_requester_devices(&self) -> Result<DeviceReport, PanelError> {
        let result = self.fetch().await;
        if let Err(ref e) = result {
            self.events.error(e);
        }
        result
    }

    async fn fetch(&self) -> Result<DeviceReport, PanelError> {
        let ticket =
            self.host.current_ticket().await.map_err(|e| PanelError::Host(format!("{e:#}")))?;
        let email = ticket.requester.email.trim().to_owned();
        if email.is_empty() {
            return Err(PanelError::BadRequest(format!(
                "requester of ticket {} has no email",
                ticket.id
            )));
        }

        self.events.status("Fetching devices...");
        let devices = self
            .gate
            .invoke_protected(TOKEN_SCOPES, |token| self.directory.managed_devices(&email, token))
            .await?;

        let report = DeviceReport {
            ticket_id: ticket.id,
            needs_review: devices.len() > self.review_threshold,
            requester: ticket.requester,
            devices,
        };
        tracing::info!(
            ticket = report.ticket_id,
            count = report.devices.len(),
            needs_review = report.needs_review,
            "device lookup completed"
        );
        self.events.status(report.summary());
        self.events.emit(PanelEvent::Devices {
            ticket_id: report.ticket_id,
            count: report.devices.len(),
            needs_review: report.needs_review,
        });
        Ok(report)
    }

    /// Post a private note on `ticket_id`.
    pub async fn attach_note(&self, ticket_id: u64, body: &str) -> Result<TicketNote, PanelError> {
        if body.trim().is_empty() {
            return Err(PanelError::BadRequest("note body is empty".to_owned()));
        }
        let note = TicketNote { ticket_id, body: body.to_owned(), is_public: false };
        if let Err(e) = self.host.put_ticket_note(note.clone()).await {
            tracing::warn!(ticket = ticket_id, err = %e, "failed to add ticket note");
            let err = PanelError::Host(format!("{e:#}"));
            self.events.error(&err);
            return Err(err);
        }
        tracing::info!(ticket = ticket_id, "ticket note added");
        self.events.status("Note added to ticket");
        Ok(note)
    }
}

#[cfg(test)]
#[path = "lookup_tests.rs"]
mod tests;
