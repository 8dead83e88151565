// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the presentation bridge.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::LOCAL_REDIRECT_URI;
use crate::error::{Outcome, PanelError};
use crate::identity::{LOGIN_SCOPES, TOKEN_SCOPES};
use crate::session::{SessionPhase, SessionSnapshot};
use crate::state::PanelState;

// -- Request/Response types ---------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub phase: SessionPhase,
}

#[derive(Debug, Deserialize)]
pub struct AuthConfigQuery {
    #[serde(default)]
    pub page_url: Option<String>,
}

/// What the host needs to construct its provider client.
#[derive(Debug, Serialize)]
pub struct AuthConfigResponse {
    pub client_id: String,
    pub authority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    pub login_scopes: Vec<String>,
    pub token_scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OutcomeResponse {
    pub outcome: Outcome,
    pub session: SessionSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub ticket_id: u64,
    pub body: String,
}

fn scopes(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

fn outcome_response(s: &PanelState, result: Result<Outcome, PanelError>) -> Response {
    match result {
        Ok(outcome) => Json(OutcomeResponse { outcome, session: s.session.snapshot() }).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<PanelState>>) -> impl IntoResponse {
    Json(HealthResponse { status: "running".to_owned(), phase: s.session.phase() })
}

/// `GET /api/v1/auth/config?page_url=...`
pub async fn auth_config(
    State(s): State<Arc<PanelState>>,
    Query(q): Query<AuthConfigQuery>,
) -> Response {
    let redirect_uri = match q.page_url {
        Some(page) => match s.config.redirect_uri(&page) {
            Ok(uri) => Some(uri),
            Err(e) => return e.to_http_response().into_response(),
        },
        None if s.config.is_local_development() => Some(LOCAL_REDIRECT_URI.to_owned()),
        None => None,
    };
    Json(AuthConfigResponse {
        client_id: s.config.identity_provider_client_id.clone(),
        authority: s.config.authority(),
        redirect_uri,
        login_scopes: scopes(LOGIN_SCOPES),
        token_scopes: scopes(TOKEN_SCOPES),
    })
    .into_response()
}

/// `GET /api/v1/session`
pub async fn session(State(s): State<Arc<PanelState>>) -> impl IntoResponse {
    Json(s.session.snapshot())
}

/// `POST /api/v1/session/sign-in`
pub async fn sign_in(State(s): State<Arc<PanelState>>) -> Response {
    let result = s.session.sign_in().await;
    outcome_response(&s, result)
}

/// `POST /api/v1/session/sign-out`
pub async fn sign_out(State(s): State<Arc<PanelState>>) -> Response {
    let result = s.session.sign_out().await;
    outcome_response(&s, result)
}

/// `POST /api/v1/session/switch`
pub async fn switch(State(s): State<Arc<PanelState>>) -> Response {
    let result = s.session.switch_identity().await;
    outcome_response(&s, result)
}

/// `POST /api/v1/session/resolve`
pub async fn resolve(State(s): State<Arc<PanelState>>) -> Response {
    let result = s.session.resolve_current_identity().await;
    outcome_response(&s, result)
}

/// `POST /api/v1/devices`: look up the open ticket's requester.
pub async fn devices(State(s): State<Arc<PanelState>>) -> Response {
    match s.lookup.fetch_requester_devices().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}

/// `POST /api/v1/devices/note`
pub async fn devices_note(
    State(s): State<Arc<PanelState>>,
    Json(req): Json<NoteRequest>,
) -> Response {
    match s.lookup.attach_note(req.ticket_id, &req.body).await {
        Ok(note) => Json(note).into_response(),
        Err(e) => e.to_http_response().into_response(),
    }
}
