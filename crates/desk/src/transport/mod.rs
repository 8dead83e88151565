// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP bridge between the panel's presentation layer and the session core.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::PanelState;

/// Build the axum `Router` with all panel routes.
pub fn build_router(state: Arc<PanelState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        // Host provider setup
        .route("/api/v1/auth/config", get(http::auth_config))
        // Session
        .route("/api/v1/session", get(http::session))
        .route("/api/v1/session/sign-in", post(http::sign_in))
        .route("/api/v1/session/sign-out", post(http::sign_out))
        .route("/api/v1/session/switch", post(http::switch))
        .route("/api/v1/session/resolve", post(http::resolve))
        // Devices
        .route("/api/v1/devices", post(http::devices))
        .route("/api/v1/devices/note", post(http::devices_note))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
