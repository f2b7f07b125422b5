use std::cmp::Reverse;
use std::sync::Arc;

use arcgis_feature::{Configuration, Feature, FeatureServiceClient, QueryParams};
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::PermitConfig;
use crate::error::Result;
use crate::filter::{FIELD_ISSUED_DATE, PermitFilter};
use crate::paginate::{self, FeatureSource, FetchedFeatures};

/// Client for the Baltimore building permits layer
///
/// Wraps a [`FeatureSource`] (normally a [`FeatureServiceClient`]) and adds
/// paging, permit specific filters and the "recent permits" ordering. The
/// client holds no per-call state; one instance is built at start-up and
/// shared by every call.
pub struct PermitClient {
    source: Arc<dyn FeatureSource>,
    config: PermitConfig,
}

impl std::fmt::Debug for PermitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermitClient")
            .field("base_url", &self.config.base_url)
            .field("page_size", &self.config.page_size)
            .finish()
    }
}

impl PermitClient {
    /// Create a client for the public permits service
    pub fn new() -> Result<Self> {
        Self::with_config(PermitConfig::new())
    }

    /// Create a client with custom configuration
    pub fn with_config(config: PermitConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .build()?;

        let configuration = Configuration {
            base_path: config.base_url.clone(),
            user_agent: None,
            timeout: Some(config.timeout),
            client: http_client,
        };
        let source = FeatureServiceClient::new(Arc::new(configuration));

        Ok(Self {
            source: Arc::new(source),
            config,
        })
    }

    /// Create a client over an arbitrary feature source
    pub fn with_source(source: Arc<dyn FeatureSource>, config: PermitConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &PermitConfig {
        &self.config
    }

    /// Fetch up to `limit` permits matching `filter`, paging as needed.
    ///
    /// `limit = None` fetches every match.
    pub async fn search(&self, filter: &PermitFilter, limit: Option<usize>) -> Result<FetchedFeatures> {
        let params = QueryParams::new(filter.where_clause());
        paginate::fetch_paginated(self.source.as_ref(), &params, limit, self.config.page_size).await
    }

    /// Look up a single permit by its exact case number.
    pub async fn find_by_case_number(&self, case_number: &str) -> Result<Option<Feature>> {
        let fetched = self
            .search(&PermitFilter::case_number(case_number), Some(1))
            .await?;
        Ok(fetched.features.into_iter().next())
    }

    /// The `limit` most recently issued permits of the last `days` days.
    ///
    /// The service does not order filtered pages by issue date, so twice the
    /// limit is fetched and sorted here before truncating.
    pub async fn recent(&self, days: u32, limit: usize, now: DateTime<Utc>) -> Result<Vec<Feature>> {
        let filter = PermitFilter::issued_within_days(days, now);
        let fetched = self.search(&filter, Some(limit.saturating_mul(2))).await?;
        debug!(
            days,
            fetched = fetched.total_retrieved,
            limit,
            "sorting recent permits"
        );

        let mut features = fetched.features;
        features.sort_by_key(|feature| Reverse(issued_millis(feature)));
        features.truncate(limit);
        Ok(features)
    }

    /// Count permits matching `filter` without fetching them.
    pub async fn count(&self, filter: &PermitFilter) -> Result<u64> {
        paginate::fetch_count(self.source.as_ref(), &filter.where_clause()).await
    }
}

fn issued_millis(feature: &Feature) -> i64 {
    feature
        .property(FIELD_ISSUED_DATE)
        .and_then(|value| value.as_i64().or_else(|| value.as_f64().map(|n| n as i64)))
        .unwrap_or(0)
}
