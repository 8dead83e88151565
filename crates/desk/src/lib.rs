// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Devicedesk: authenticated session and token lifecycle for a support-ticket
//! device lookup panel.

pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod gate;
pub mod identity;
pub mod lookup;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod test_support;
pub mod ticket;
pub mod transport;
