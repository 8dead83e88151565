// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device directory client: the managed-device query for a requester.

use std::sync::Once;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::gate::RemoteFailure;
use crate::identity::AccessToken;

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed by reqwest's rustls backend).
fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Issues authenticated GETs against the directory API.
pub trait DirectoryTransport: Send + Sync + 'static {
    /// GET `url` with `token` as bearer credential and decode the JSON body.
    fn get_json<'a>(
        &'a self,
        url: &'a str,
        token: AccessToken,
    ) -> BoxFuture<'a, Result<Value, RemoteFailure>>;
}

/// reqwest-backed [`DirectoryTransport`].
pub struct HttpDirectoryTransport {
    client: Client,
}

impl HttpDirectoryTransport {
    pub fn new() -> anyhow::Result<Self> {
        ensure_crypto_provider();
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client })
    }
}

impl DirectoryTransport for HttpDirectoryTransport {
    fn get_json<'a>(
        &'a self,
        url: &'a str,
        token: AccessToken,
    ) -> BoxFuture<'a, Result<Value, RemoteFailure>> {
        Box::pin(async move {
            let resp = self
                .client
                .get(url)
                .bearer_auth(token.secret())
                .send()
                .await
                .map_err(|e| RemoteFailure::transport(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(RemoteFailure::classify(status.as_u16(), &body));
            }
            resp.json().await.map_err(|e| RemoteFailure::transport(format!("invalid body: {e}")))
        })
    }
}

/// A managed device record. Unknown fields are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDevice {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub user_display_name: Option<String>,
    #[serde(default)]
    pub compliance_state: Option<String>,
    #[serde(default)]
    pub last_sync_date_time: Option<String>,
    #[serde(default)]
    pub enrolled_date_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ManagedDevice {
    /// Device name, falling back to display name, then id.
    pub fn label(&self) -> &str {
        self.device_name
            .as_deref()
            .or(self.display_name.as_deref())
            .or(self.id.as_deref())
            .unwrap_or("unknown device")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ManagedDeviceList {
    #[serde(default)]
    value: Vec<ManagedDevice>,
}

/// Builds device queries against a directory base URL.
pub struct DirectoryClient {
    base_url: String,
    transport: Box<dyn DirectoryTransport>,
}

impl DirectoryClient {
    pub fn new(base_url: impl Into<String>, transport: Box<dyn DirectoryTransport>) -> Self {
        let base_url = base_url.into();
        Self { base_url: base_url.trim_end_matches('/').to_owned(), transport }
    }

    /// `managedDevices` URL filtered by user principal name.
    pub fn managed_devices_url(&self, email: &str) -> String {
        let filter = format!("userPrincipalName eq '{}'", email.replace('\'', "''"));
        format!(
            "{}/deviceManagement/managedDevices?$filter={}",
            self.base_url,
            percent_encode(&filter)
        )
    }

    /// Devices enrolled to `email`.
    pub async fn managed_devices(
        &self,
        email: &str,
        token: AccessToken,
    ) -> Result<Vec<ManagedDevice>, RemoteFailure> {
        let url = self.managed_devices_url(email);
        let body = self.transport.get_json(&url, token).await?;
        let list: ManagedDeviceList = serde_json::from_value(body)
            .map_err(|e| RemoteFailure::transport(format!("unexpected device list: {e}")))?;
        Ok(list.value)
    }
}

/// Percent-encode everything except RFC 3986 unreserved characters.
fn percent_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(char::from(byte))
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
#[path = "directory_tests.rs"]
mod tests;
