//! Async client for ArcGIS Feature Service `query` endpoints.
//!
//! The client speaks the subset of the REST query protocol used by open-data
//! portals: filter expressions (`where`), field selection (`outFields`),
//! GeoJSON output, offset based paging and count-only queries.

pub mod client;
pub mod models;

pub use client::{Configuration, FeatureServiceClient, FeatureServiceError};
pub use models::{Feature, FeatureCollection, QueryParams};

/// Hard per-request record ceiling enforced by ArcGIS hosted feature services.
pub const MAX_RECORD_COUNT: u32 = 1000;
