//! Error types for the Worldforge core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors; retry and
//! circuit-breaker decisions key off these variants (see
//! `workflow::activity::ErrorClass`).

use crate::net::breaker::CircuitOpen;

/// Errors related to configuration loading, parsing, and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required configuration variable is absent.
    #[error("missing required environment variable: {name}")]
    MissingVar {
        /// The name of the missing variable.
        name: &'static str,
    },

    /// A configuration variable has an unacceptable value.
    #[error("invalid value for {name}: {message}")]
    InvalidValue {
        /// The name of the invalid variable.
        name: &'static str,
        /// A description of why the value is invalid.
        message: String,
    },
}

/// Errors from the service-registry resolver.
///
/// These never escape `net::discovery::ServiceDiscovery::resolve`, which
/// falls back to DNS addressing; they exist so the fallback path can log
/// what actually went wrong.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    /// HTTP request to the registry failed.
    #[error("registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Registry answered with a non-success status.
    #[error("registry returned HTTP {status}")]
    BadStatus {
        /// The HTTP status code.
        status: u16,
    },

    /// No healthy instance is registered for the service.
    #[error("no healthy instances of service '{service}'")]
    NoInstances {
        /// The logical service name.
        service: String,
    },
}

/// Errors from the LLM provider.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// HTTP request to the LLM endpoint failed.
    #[error("LLM HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// LLM API returned an error response.
    #[error("LLM API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// LLM provider rate limit hit.
    #[error("LLM rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The completion payload is missing a required field.
    #[error("unexpected LLM response shape: missing {field}")]
    MissingField {
        /// Dotted path of the absent field, e.g. `choices[0].message.content`.
        field: &'static str,
    },

    /// The content field was not valid JSON.
    #[error("failed to parse LLM response: {0}")]
    Parse(String),

    /// The parsed content does not match the requested schema.
    #[error("LLM response failed schema validation for '{schema}': {message}")]
    Validation {
        /// The symbolic schema name that was requested.
        schema: String,
        /// What the validator rejected.
        message: String,
    },

    /// The symbolic schema name is not registered.
    #[error("unknown response schema: {0}")]
    UnknownSchema(String),

    /// A circuit breaker is refusing LLM calls.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
}

/// Errors from the image-generation pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// HTTP request to the image endpoint failed.
    #[error("image API request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Image API returned an error response.
    #[error("image API error (status {status}): {message}")]
    Api {
        /// The HTTP status code.
        status: u16,
        /// The error message from the API.
        message: String,
    },

    /// The inference response carried no generated images.
    #[error("no images were generated")]
    NoImages,

    /// Downloading the generated asset failed.
    #[error("image download failed (status {status})")]
    Download {
        /// The HTTP status code of the failed download.
        status: u16,
    },

    /// The presigned PUT was rejected.
    #[error("image upload failed (status {status}): {message}")]
    Upload {
        /// The HTTP status code.
        status: u16,
        /// Response body of the rejected upload.
        message: String,
    },

    /// A Media-service step of the pipeline failed.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A circuit breaker is refusing image calls.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),
}

/// Errors from the gRPC service gateway.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The circuit breaker for this service is open.
    #[error(transparent)]
    CircuitOpen(#[from] CircuitOpen),

    /// The channel to the service could not be built.
    #[error("{service} channel error: {source}")]
    Channel {
        /// Logical service name.
        service: &'static str,
        /// The underlying transport error.
        #[source]
        source: tonic::transport::Error,
    },

    /// The remote call failed with a gRPC status.
    #[error("{service} call failed: {status}")]
    Rpc {
        /// Logical service name (e.g. `character-service`).
        service: &'static str,
        /// The gRPC status returned by the server.
        status: tonic::Status,
    },

    /// The remote call succeeded but reported failure.
    #[error("{service} rejected the request: {message}")]
    Rejected {
        /// Logical service name.
        service: &'static str,
        /// What the service reported.
        message: String,
    },
}

/// Errors from MongoDB storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A driver-level database error.
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    /// Insert hit an already-used id.
    #[error("duplicate id '{id}' in collection '{collection}'")]
    DuplicateKey {
        /// Collection name.
        collection: &'static str,
        /// The conflicting document id.
        id: String,
    },

    /// The requested document does not exist.
    #[error("document '{id}' not found in collection '{collection}'")]
    NotFound {
        /// Collection name.
        collection: &'static str,
        /// The missing document id.
        id: String,
    },

    /// Counter increment on a field outside the whitelist.
    #[error("invalid field for increment: {field}")]
    InvalidCounterField {
        /// The rejected field name.
        field: String,
    },

    /// BSON serialization failed.
    #[error("BSON serialization error: {0}")]
    Serialize(#[from] mongodb::bson::ser::Error),

    /// BSON deserialization failed.
    #[error("BSON deserialization error: {0}")]
    Deserialize(#[from] mongodb::bson::de::Error),
}

impl StorageError {
    /// Maps a driver error to [`StorageError::DuplicateKey`] when the server
    /// reported E11000, passing everything else through as [`Database`].
    ///
    /// [`Database`]: StorageError::Database
    pub fn from_insert(
        err: mongodb::error::Error,
        collection: &'static str,
        id: impl Into<String>,
    ) -> Self {
        use mongodb::error::{ErrorKind, WriteFailure};

        let duplicate = matches!(
            err.kind.as_ref(),
            ErrorKind::Write(WriteFailure::WriteError(we)) if we.code == 11000
        );
        if duplicate {
            StorageError::DuplicateKey {
                collection,
                id: id.into(),
            }
        } else {
            StorageError::Database(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_missing_var_message() {
        let err = ConfigError::MissingVar {
            name: "OPENROUTER_API_KEY",
        };
        assert_eq!(
            err.to_string(),
            "missing required environment variable: OPENROUTER_API_KEY"
        );
    }

    #[test]
    fn config_error_invalid_value_message() {
        let err = ConfigError::InvalidValue {
            name: "CONSUL_PORT",
            message: "expected an integer, got 'abc'".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for CONSUL_PORT: expected an integer, got 'abc'"
        );
    }

    #[test]
    fn llm_error_rate_limited_message() {
        let err = LlmError::RateLimited {
            retry_after_secs: 30,
        };
        assert_eq!(err.to_string(), "LLM rate limited, retry after 30 seconds");
    }

    #[test]
    fn llm_error_missing_field_message() {
        let err = LlmError::MissingField {
            field: "choices[0].message.content",
        };
        assert_eq!(
            err.to_string(),
            "unexpected LLM response shape: missing choices[0].message.content"
        );
    }

    #[test]
    fn llm_error_unknown_schema_message() {
        let err = LlmError::UnknownSchema("NotARealResponse".to_string());
        assert_eq!(err.to_string(), "unknown response schema: NotARealResponse");
    }

    #[test]
    fn image_error_no_images_message() {
        assert_eq!(ImageError::NoImages.to_string(), "no images were generated");
    }

    #[test]
    fn image_error_upload_message() {
        let err = ImageError::Upload {
            status: 403,
            message: "signature expired".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "image upload failed (status 403): signature expired"
        );
    }

    #[test]
    fn service_error_rejected_message() {
        let err = ServiceError::Rejected {
            service: "media-service",
            message: "upload not confirmed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "media-service rejected the request: upload not confirmed"
        );
    }

    #[test]
    fn storage_error_invalid_counter_field_message() {
        let err = StorageError::InvalidCounterField {
            field: "users_predicted".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid field for increment: users_predicted"
        );
    }

    #[test]
    fn storage_error_not_found_message() {
        let err = StorageError::NotFound {
            collection: "tasks",
            id: "abc-123".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "document 'abc-123' not found in collection 'tasks'"
        );
    }
}
