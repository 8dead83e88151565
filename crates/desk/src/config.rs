// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::PanelError;

/// Fixed redirect target used when the host runs in local development.
pub const LOCAL_REDIRECT_URI: &str = "http://localhost:4567/0/assets/authRedirect.html";

/// Page that completes the provider's redirect handshake.
const REDIRECT_PAGE: &str = "authRedirect.html";

/// Marker in the host subdomain that selects [`LOCAL_REDIRECT_URI`].
const LOCAL_MARKER: &str = "localhost";

const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Identifiers supplied by the host's extension settings.
///
/// Accepts both the generic field names and the ones used by the host's
/// settings payload (`azure_client_id`, `azure_tenant_id`, `zendesk_subdomain`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PanelConfig {
    #[serde(alias = "azure_client_id")]
    pub identity_provider_client_id: String,
    #[serde(alias = "azure_tenant_id")]
    pub directory_tenant_id: String,
    #[serde(alias = "zendesk_subdomain")]
    pub host_subdomain: String,
}

impl PanelConfig {
    /// Parse the host's settings JSON.
    pub fn from_settings_json(json: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        if config.identity_provider_client_id.trim().is_empty() {
            anyhow::bail!("identity provider client id is empty");
        }
        if config.directory_tenant_id.trim().is_empty() {
            anyhow::bail!("directory tenant id is empty");
        }
        Ok(config)
    }

    /// Token authority for the configured tenant.
    pub fn authority(&self) -> String {
        format!("{DEFAULT_AUTHORITY_HOST}/{}", self.directory_tenant_id)
    }

    pub fn is_local_development(&self) -> bool {
        self.host_subdomain.contains(LOCAL_MARKER)
    }

    /// Redirect target for interactive flows.
    ///
    /// Local development uses [`LOCAL_REDIRECT_URI`]. Otherwise the last path
    /// segment of `page_url` is replaced by the redirect page; query and
    /// fragment are dropped.
    pub fn redirect_uri(&self, page_url: &str) -> Result<String, PanelError> {
        if self.is_local_development() {
            return Ok(LOCAL_REDIRECT_URI.to_owned());
        }
        let mut url = Url::parse(page_url)
            .map_err(|e| PanelError::BadRequest(format!("invalid page url {page_url:?}: {e}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                PanelError::BadRequest(format!("page url {page_url:?} cannot carry a path"))
            })?;
            segments.pop().push(REDIRECT_PAGE);
        }
        url.set_query(None);
        url.set_fragment(None);
        Ok(url.into())
    }
}

/// Runtime tunables. Defaults match the hosted panel; `from_env` applies
/// `DEVICEDESK_*` overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelSettings {
    /// Interval of the background silent-renewal task.
    pub refresh_interval: Duration,
    /// Requesters with more devices than this are flagged for review.
    pub review_threshold: usize,
    /// Base URL of the device directory API.
    pub directory_base_url: String,
}

impl Default for PanelSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
            review_threshold: 2,
            directory_base_url: "https://graph.microsoft.com/v1.0".to_owned(),
        }
    }
}

impl PanelSettings {
    /// Defaults overridden by `DEVICEDESK_REFRESH_SECS`,
    /// `DEVICEDESK_REVIEW_THRESHOLD`, and `DEVICEDESK_DIRECTORY_URL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Self::default();
        if let Ok(secs) = std::env::var("DEVICEDESK_REFRESH_SECS") {
            let secs: u64 = secs.trim().parse()?;
            if secs == 0 {
                anyhow::bail!("DEVICEDESK_REFRESH_SECS must be positive");
            }
            settings.refresh_interval = Duration::from_secs(secs);
        }
        if let Ok(threshold) = std::env::var("DEVICEDESK_REVIEW_THRESHOLD") {
            settings.review_threshold = threshold.trim().parse()?;
        }
        if let Ok(url) = std::env::var("DEVICEDESK_DIRECTORY_URL") {
            settings.directory_base_url = url.trim().trim_end_matches('/').to_owned();
        }
        Ok(settings)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
