//! Baltimore City building permits over the city's open-data feature service.
//!
//! The crate turns structured search intents into filter expressions
//! ([`filter`]), pages transparently past the service's 1000 record ceiling
//! ([`paginate`]), renders permits as text ([`format`]) and exposes the whole
//! pipeline as named operations for tool-calling agents ([`operations`]).
//!
//! ```rust,no_run
//! use balt_permits::{PermitClient, PermitOperations};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let operations = PermitOperations::new(PermitClient::new()?);
//! let output = operations
//!     .call("search_permits_by_neighborhood", Some(json!({"neighborhood": "Canton", "limit": 5})))
//!     .await?;
//! println!("{}", output.joined());
//! # Ok(())
//! # }
//! ```

/// `query` endpoint of the DHCD building permits layer
pub const PERMIT_SERVICE_URL: &str = "https://egisdata.baltimorecity.gov/egis/rest/services/Housing/DHCD_Open_Baltimore_Datasets/FeatureServer/3/query";

pub use arcgis_feature as feature;

pub mod client;
pub mod config;
pub mod error;
pub mod filter;
pub mod format;
pub mod operations;
pub mod paginate;

pub use client::PermitClient;
pub use config::PermitConfig;
pub use error::{PermitError, Result};
pub use filter::PermitFilter;
pub use operations::{OperationOutput, OperationSpec, PermitOperations, operation_specs};
pub use paginate::{FeatureSource, FetchedFeatures};
