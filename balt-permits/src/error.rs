use arcgis_feature::FeatureServiceError;
use thiserror::Error;

/// Errors that can occur when querying permits
#[derive(Error, Debug)]
pub enum PermitError {
    /// Caller input was malformed (bad date, missing argument, ...)
    #[error("{message}")]
    ValidationError { message: String },

    /// The feature service could not be reached or answered with an error
    #[error("Failed to fetch permit data: {0}")]
    FetchError(#[from] FeatureServiceError),

    /// No operation is registered under this name
    #[error("Unknown tool: {name}")]
    UnknownOperation { name: String },

    /// Building the HTTP client failed
    #[error("HTTP client setup failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl PermitError {
    /// Create a new validation error
    pub fn validation_error<S: Into<String>>(message: S) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Create a new unknown operation error
    pub fn unknown_operation<S: Into<String>>(name: S) -> Self {
        Self::UnknownOperation { name: name.into() }
    }
}

/// Type alias for Results using PermitError
pub type Result<T> = std::result::Result<T, PermitError>;
