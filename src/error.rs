//! Crate-wide error types and `Result` alias.

// std
use std::sync::Arc;
// self
use crate::config::IpType;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the connector crate.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Tls(#[from] rustls::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Admin API request for instance '{instance}' failed with HTTP {status}: {message}")]
	AdminApi { instance: String, status: u16, message: String },
	#[error("Unable to change process-wide settings: the connector registry is already initialized.")]
	AlreadyInitialized,
	#[error("Unable to parse X.509 certificate: {0}")]
	CertParse(String),
	#[error("Connector for instance '{instance}' has been closed.")]
	Closed { instance: String },
	#[error("TLS connection to instance '{instance}' failed: {source}")]
	Handshake {
		instance: String,
		#[source]
		source: std::io::Error,
	},
	#[error("Invalid instance connection name '{name}': {reason}")]
	InvalidInstanceName { name: String, reason: &'static str },
	#[error("Instance '{instance}' exposes no IP address matching the preference {requested:?}.")]
	IpTypeNotAvailable { instance: String, requested: Vec<IpType> },
	#[error("Unable to generate the RSA client key pair: {0}")]
	KeyGeneration(String),
	#[error("Metrics error: {0}")]
	Metrics(String),
	#[error("Not authorized to connect to instance '{instance}' (HTTP 403 from the admin API).")]
	NotAuthorized { instance: String },
	#[error("Instance '{instance}' was not found (HTTP 404 from the admin API).")]
	NotFound { instance: String },
	#[error(
		"Unable to get connection info for instance '{instance}' within {timeout_ms} ms. \
		 Last refresh attempt failed: {source}"
	)]
	RefreshFailed {
		instance: String,
		timeout_ms: u64,
		#[source]
		source: Arc<Error>,
	},
	#[error(
		"Unable to get connection info for instance '{instance}' within {timeout_ms} ms. \
		 No refresh has completed."
	)]
	RefreshTimeout { instance: String, timeout_ms: u64 },
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
