use crate::models::{self, FeatureCollection, QueryParams, ServiceError};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for the feature service client
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Full URL of the layer `query` endpoint
    /// (e.g. `https://host/arcgis/rest/services/Name/FeatureServer/0/query`)
    pub base_path: String,
    /// User agent string for HTTP requests
    pub user_agent: Option<String>,
    /// Per-request timeout; `None` leaves it to the HTTP client
    pub timeout: Option<Duration>,
    /// HTTP client instance
    pub client: reqwest::Client,
}

impl Configuration {
    /// Create a configuration for the given `query` endpoint
    pub fn new<S: Into<String>>(base_path: S) -> Configuration {
        Configuration {
            base_path: base_path.into(),
            user_agent: Some(concat!("arcgis-feature-rs/", env!("CARGO_PKG_VERSION")).to_owned()),
            timeout: None,
            client: reqwest::Client::new(),
        }
    }
}

/// # Feature Service Client
///
/// A thin async client over a single ArcGIS Feature Service layer. Each call
/// issues exactly one HTTP GET; paging across the service's record ceiling is
/// left to the caller.
///
/// ```rust,no_run
/// use arcgis_feature::{Configuration, FeatureServiceClient, QueryParams};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Configuration::new("https://example.com/arcgis/rest/services/Permits/FeatureServer/0/query");
/// let client = FeatureServiceClient::new(Arc::new(config));
///
/// let page = client
///     .query(&QueryParams::new("1=1").with_offset(0).with_record_count(10))
///     .await?;
/// println!("{} features, more: {}", page.features.len(), page.exceeded_transfer_limit());
/// # Ok(())
/// # }
/// ```
pub struct FeatureServiceClient {
    configuration: Arc<Configuration>,
}

impl std::fmt::Debug for FeatureServiceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureServiceClient")
            .field("base_path", &self.configuration.base_path)
            .finish()
    }
}

/// Errors that can occur when querying a feature service
#[derive(Debug)]
pub enum FeatureServiceError {
    /// Connection, DNS, TLS or other transport-level failures
    RequestError(Box<dyn std::error::Error + Send + Sync>),

    /// The request did not complete within the configured timeout
    Timeout,

    /// The response body was not the JSON shape we expected
    ParseError(serde_json::Error),

    /// The service answered with an error, either as a non-2xx HTTP status or
    /// as an `error` object inside a 2xx response
    ApiError {
        /// HTTP status, or the service's own error code for embedded errors
        status: u16,
        /// Message reported by the service
        message: String,
    },
}

impl std::fmt::Display for FeatureServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeatureServiceError::RequestError(e) => write!(f, "Request error: {}", e),
            FeatureServiceError::Timeout => write!(f, "Request timed out"),
            FeatureServiceError::ParseError(e) => write!(f, "Parse error: {}", e),
            FeatureServiceError::ApiError { status, message } => {
                write!(f, "Feature service error ({}): {}", status, message)
            }
        }
    }
}

impl std::error::Error for FeatureServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FeatureServiceError::RequestError(e) => Some(e.as_ref()),
            FeatureServiceError::ParseError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FeatureServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FeatureServiceError::Timeout
        } else {
            FeatureServiceError::RequestError(Box::new(e))
        }
    }
}

impl FeatureServiceClient {
    /// Create a new client for the configured layer
    pub fn new(configuration: Arc<Configuration>) -> Self {
        Self { configuration }
    }

    /// The `query` endpoint this client talks to
    pub fn base_path(&self) -> &str {
        &self.configuration.base_path
    }

    /// Fetch one page of features.
    ///
    /// The page size and offset are whatever `params` carries; the service may
    /// return fewer records than requested and signals remaining data through
    /// [`FeatureCollection::exceeded_transfer_limit`].
    pub async fn query(&self, params: &QueryParams) -> Result<FeatureCollection, FeatureServiceError> {
        let body = self.get_json(params).await?;
        serde_json::from_value(body).map_err(FeatureServiceError::ParseError)
    }

    /// Count the records matching `where_clause` without fetching them.
    pub async fn count(&self, where_clause: &str) -> Result<u64, FeatureServiceError> {
        let params = QueryParams::new(where_clause).count_only();
        let body = self.get_json(&params).await?;
        Ok(models::count_from_response(&body))
    }

    async fn get_json(&self, params: &QueryParams) -> Result<Value, FeatureServiceError> {
        let mut request = self
            .configuration
            .client
            .get(&self.configuration.base_path)
            .query(&params.to_query_pairs());

        if let Some(user_agent) = &self.configuration.user_agent {
            request = request.header(reqwest::header::USER_AGENT, user_agent);
        }
        if let Some(timeout) = self.configuration.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(FeatureServiceError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let text = response.text().await?;
        let body: Value = serde_json::from_str(&text).map_err(FeatureServiceError::ParseError)?;

        // ArcGIS reports bad filters and similar failures with HTTP 200
        if let Some(error) = ServiceError::from_body(&body) {
            let status = error
                .code
                .and_then(|code| u16::try_from(code).ok())
                .unwrap_or(400);
            return Err(FeatureServiceError::ApiError {
                status,
                message: error.describe(),
            });
        }

        Ok(body)
    }
}
