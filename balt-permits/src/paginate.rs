//! Offset paging across the feature service's per-request record ceiling.

use arcgis_feature::{
    Feature, FeatureCollection, FeatureServiceClient, FeatureServiceError, MAX_RECORD_COUNT,
    QueryParams,
};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::Result;

/// Upper bound on pages per fetch, so a service that keeps claiming more data
/// cannot keep the loop alive forever.
pub const MAX_ROUNDS: usize = 10_000;

pub type SourceResult<T> = std::result::Result<T, FeatureServiceError>;

/// Where pages come from.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Fetch a single page.
    async fn query(&self, params: &QueryParams) -> SourceResult<FeatureCollection>;

    /// Count matching records without fetching them.
    async fn count(&self, where_clause: &str) -> SourceResult<u64>;
}

#[async_trait]
impl FeatureSource for FeatureServiceClient {
    async fn query(&self, params: &QueryParams) -> SourceResult<FeatureCollection> {
        FeatureServiceClient::query(self, params).await
    }

    async fn count(&self, where_clause: &str) -> SourceResult<u64> {
        FeatureServiceClient::count(self, where_clause).await
    }
}

/// Features accumulated across all pages of one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedFeatures {
    pub features: Vec<Feature>,
    pub total_retrieved: usize,
}

impl FetchedFeatures {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Fetch up to `max_records` features matching `base`, one page at a time.
///
/// `max_records = None` fetches everything. Pages are requested strictly in
/// sequence; the offset advances by the number of records each page actually
/// returned. The loop stops, checked in this order, when a page is empty, when
/// a page is short, when the service does not flag more data, or when the
/// budget is met. Any page failure aborts the whole fetch.
pub async fn fetch_paginated<S>(
    source: &S,
    base: &QueryParams,
    max_records: Option<usize>,
    page_size: u32,
) -> Result<FetchedFeatures>
where
    S: FeatureSource + ?Sized,
{
    let page_size = page_size.clamp(1, MAX_RECORD_COUNT);
    let mut features: Vec<Feature> = Vec::new();
    let mut offset: u64 = 0;

    if max_records == Some(0) {
        return Ok(FetchedFeatures::default());
    }

    let mut rounds = 0;
    loop {
        if rounds == MAX_ROUNDS {
            warn!(
                rounds,
                retrieved = features.len(),
                "page limit reached, returning partial result set"
            );
            break;
        }
        rounds += 1;

        // remaining > 0 here: the budget check below stops the loop first
        let requested = match max_records {
            Some(max) => (max - features.len()).min(page_size as usize) as u32,
            None => page_size,
        };

        let params = base.with_offset(offset).with_record_count(requested);
        let page = source.query(&params).await?;
        let more = page.exceeded_transfer_limit();
        let mut page_features = page.features;

        debug!(
            offset,
            requested,
            returned = page_features.len(),
            more,
            "fetched permit page"
        );

        if page_features.is_empty() {
            break;
        }

        page_features.truncate(requested as usize);
        let returned = page_features.len();
        features.extend(page_features);
        offset += returned as u64;

        if returned < requested as usize {
            break;
        }
        if !more {
            break;
        }
        if max_records.is_some_and(|max| features.len() >= max) {
            break;
        }
    }

    let total_retrieved = features.len();
    Ok(FetchedFeatures {
        features,
        total_retrieved,
    })
}

/// Count matching records with a single count-only request.
pub async fn fetch_count<S>(source: &S, where_clause: &str) -> Result<u64>
where
    S: FeatureSource + ?Sized,
{
    let count = source.count(where_clause).await?;
    debug!(where_clause, count, "counted permits");
    Ok(count)
}


#[cfg(test)]
mod tests {
    use super::testing::{MoreFlag, ScriptedSource};
    use super::*;
    use crate::error::PermitError;

    fn base() -> QueryParams {
        QueryParams::new("1=1")
    }

    #[tokio::test]
    async fn returns_min_of_budget_and_available() {
        for (available, max) in [(0, 10), (5, 10), (10, 10), (2500, 2500), (2500, 1800), (999, 5000), (3000, 1)] {
            let source = ScriptedSource::with_records(available);
            let fetched = fetch_paginated(&source, &base(), Some(max), 1000).await.unwrap();

            assert_eq!(fetched.total_retrieved, available.min(max), "available={available} max={max}");
            assert_eq!(fetched.features.len(), fetched.total_retrieved);
            for request in source.requests() {
                assert!(request.result_record_count.unwrap() > 0);
                assert!(request.result_record_count.unwrap() <= 1000);
            }
        }
    }

    #[tokio::test]
    async fn offsets_advance_by_returned_count() {
        let source = ScriptedSource::with_records(2500);
        let fetched = fetch_paginated(&source, &base(), Some(2500), 1000).await.unwrap();
        assert_eq!(fetched.total_retrieved, 2500);

        let pages: Vec<_> = source
            .requests()
            .iter()
            .map(|r| (r.result_offset.unwrap(), r.result_record_count.unwrap()))
            .collect();
        assert_eq!(pages, vec![(0, 1000), (1000, 1000), (2000, 500)]);

        let issued: Vec<i64> = fetched
            .features
            .iter()
            .map(|f| f.property("IssuedDate").unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(issued, (0..2500).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn short_page_from_a_lower_server_cap_ends_the_fetch() {
        let mut source = ScriptedSource::with_records(450);
        source.server_cap = 200;
        let fetched = fetch_paginated(&source, &base(), None, 1000).await.unwrap();
        // a short first page (200 < 1000) ends the fetch
        assert_eq!(fetched.total_retrieved, 200);
        assert_eq!(source.rounds(), 1);
    }

    #[tokio::test]
    async fn exact_page_boundary_takes_one_round() {
        let source = ScriptedSource::with_records(1000);
        let fetched = fetch_paginated(&source, &base(), None, 1000).await.unwrap();
        assert_eq!(fetched.total_retrieved, 1000);
        assert_eq!(source.rounds(), 1);

        let source = ScriptedSource::with_records(1000);
        let fetched = fetch_paginated(&source, &base(), Some(1000), 1000).await.unwrap();
        assert_eq!(fetched.total_retrieved, 1000);
        assert_eq!(source.rounds(), 1);
    }

    #[tokio::test]
    async fn misreported_more_data_costs_one_empty_round() {
        let mut source = ScriptedSource::with_records(1000);
        source.more = MoreFlag::Always;
        let fetched = fetch_paginated(&source, &base(), None, 1000).await.unwrap();
        assert_eq!(fetched.total_retrieved, 1000);
        assert_eq!(source.rounds(), 2);
        assert_eq!(source.requests()[1].result_offset, Some(1000));

        // with a budget of exactly one page the budget check stops first
        let mut source = ScriptedSource::with_records(1000);
        source.more = MoreFlag::Always;
        fetch_paginated(&source, &base(), Some(1000), 1000).await.unwrap();
        assert_eq!(source.rounds(), 1);
    }

    #[tokio::test]
    async fn missing_more_flag_stops_after_a_full_page() {
        let mut source = ScriptedSource::with_records(5000);
        source.more = MoreFlag::Never;
        let fetched = fetch_paginated(&source, &base(), Some(3000), 1000).await.unwrap();
        assert_eq!(fetched.total_retrieved, 1000);
        assert_eq!(source.rounds(), 1);
    }

    #[tokio::test]
    async fn oversized_pages_are_truncated_to_budget() {
        let mut source = ScriptedSource::with_records(5000);
        source.ignore_record_count = true;
        let fetched = fetch_paginated(&source, &base(), Some(1500), 1000).await.unwrap();
        assert_eq!(fetched.total_retrieved, 1500);
        assert_eq!(source.requests()[1].result_offset, Some(1000));
        assert_eq!(source.requests()[1].result_record_count, Some(500));
    }

    #[tokio::test]
    async fn zero_budget_issues_no_request() {
        let source = ScriptedSource::with_records(10);
        let fetched = fetch_paginated(&source, &base(), Some(0), 1000).await.unwrap();
        assert!(fetched.is_empty());
        assert_eq!(source.rounds(), 0);
    }

    #[tokio::test]
    async fn failure_mid_fetch_discards_partial_results() {
        let mut source = ScriptedSource::with_records(3000);
        source.fail_on_round = Some(2);
        let err = fetch_paginated(&source, &base(), Some(3000), 1000).await.unwrap_err();
        assert!(matches!(err, PermitError::FetchError(_)));
        assert_eq!(source.rounds(), 2);
    }

    #[tokio::test]
    async fn endless_service_is_capped() {
        let mut source = ScriptedSource::with_records(MAX_ROUNDS + 10);
        source.more = MoreFlag::Always;
        let fetched = fetch_paginated(&source, &base(), None, 1).await.unwrap();
        assert_eq!(source.rounds(), MAX_ROUNDS);
        assert_eq!(fetched.total_retrieved, MAX_ROUNDS);
    }

    #[tokio::test]
    async fn repeated_fetches_are_identical() {
        let source = ScriptedSource::with_records(1234);
        let first = fetch_paginated(&source, &base(), Some(1100), 500).await.unwrap();
        let second = fetch_paginated(&source, &base(), Some(1100), 500).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn count_uses_a_single_count_request() {
        let source = ScriptedSource::with_records(42);
        assert_eq!(fetch_count(&source, "1=1").await.unwrap(), 42);
        assert_eq!(source.rounds(), 0);
        assert_eq!(*source.count_calls.lock().unwrap(), vec!["1=1".to_string()]);
    }
}
