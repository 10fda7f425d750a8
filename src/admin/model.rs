//! Wire model for the admin API connection endpoints.

// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Connection metadata for an instance, as returned by `connectSettings`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectSettings {
	/// CA certificate establishing trust in the server certificate.
	pub server_ca_cert: Option<SslCert>,
	/// Addresses assigned to the instance, tagged by type.
	#[serde(default)]
	pub ip_addresses: Vec<IpMapping>,
	/// Region the instance reports; must match the configured connection name.
	#[serde(default)]
	pub region: String,
	/// Engine type and version, e.g. `POSTGRES_16`.
	#[serde(default)]
	pub database_version: Option<String>,
	/// DNS name assigned to the instance, when configured.
	#[serde(default)]
	pub dns_name: Option<String>,
	/// Whether connectivity goes through Private Service Connect.
	#[serde(default)]
	pub psc_enabled: bool,
}

/// A PEM certificate entry.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SslCert {
	/// PEM-encoded certificate material.
	pub cert: String,
	/// Expiration advertised alongside the certificate.
	#[serde(default)]
	pub expiration_time: Option<DateTime<Utc>>,
}

/// Address entry within [`ConnectSettings`].
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpMapping {
	/// Address class tag (`PRIMARY`, `PRIVATE`, `PSC`).
	#[serde(rename = "type")]
	pub kind: String,
	/// Dotted-decimal or IPv6 address, or a PSC DNS name.
	pub ip_address: String,
}

/// Request body for `:generateEphemeralCert`.
///
/// The admin API uses snake_case for these two fields, unlike the rest of its surface.
#[derive(Clone, Debug, Serialize)]
pub struct GenerateEphemeralCertRequest {
	/// SPKI PEM public key to be signed into the ephemeral certificate.
	#[serde(rename = "public_key")]
	pub public_key: String,
	/// OAuth token forwarded for IAM database authentication.
	#[serde(rename = "access_token", skip_serializing_if = "Option::is_none")]
	pub access_token: Option<String>,
}

/// Response body for `:generateEphemeralCert`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateEphemeralCertResponse {
	/// Short-lived client certificate signed from the submitted public key.
	pub ephemeral_cert: SslCert,
}

/// Error envelope used by admin API failure responses.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
	/// Structured error detail, when the API provided one.
	#[serde(default)]
	pub error: Option<ApiErrorDetail>,
}

/// Human-readable error detail within [`ApiErrorBody`].
#[derive(Debug, Deserialize)]
pub struct ApiErrorDetail {
	/// Error summary produced by the API.
	#[serde(default)]
	pub message: String,
}
