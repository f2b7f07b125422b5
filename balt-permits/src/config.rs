use std::time::Duration;

use arcgis_feature::MAX_RECORD_COUNT;

use crate::PERMIT_SERVICE_URL;

/// Configuration for the permit client
#[derive(Debug, Clone)]
pub struct PermitConfig {
    /// `query` endpoint of the permits layer
    pub base_url: String,
    /// User agent for HTTP requests
    pub user_agent: String,
    /// Timeout applied to every remote request
    pub timeout: Duration,
    /// Records requested per page, at most the service ceiling
    pub page_size: u32,
}

impl Default for PermitConfig {
    fn default() -> Self {
        Self {
            base_url: PERMIT_SERVICE_URL.to_string(),
            user_agent: concat!("balt-permits-rs/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout: Duration::from_secs(30),
            page_size: MAX_RECORD_COUNT,
        }
    }
}

impl PermitConfig {
    /// Create a new configuration pointing at the Baltimore permits layer
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the client at a different feature layer
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set custom user agent
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set the per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the page size, clamped to `1..=1000`
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_RECORD_COUNT);
        self
    }
}
