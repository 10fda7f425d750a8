//! The immutable connection-info bundle served to callers.

// std
use std::collections::HashMap;
// crates.io
use rustls::ClientConfig;
// self
use crate::{
	_prelude::*,
	config::{InstanceName, IpType},
};

/// Everything needed to open one mutually-authenticated connection to an instance.
///
/// A bundle is immutable once published; a refresh replaces the whole value.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
	/// Instance the bundle belongs to.
	pub instance: InstanceName,
	/// Instant at which the ephemeral client certificate becomes invalid.
	pub expiration: DateTime<Utc>,
	/// Addresses exposed by the instance, keyed by IP class.
	pub ip_addresses: HashMap<IpType, String>,
	/// DNS name advertised by the instance, when configured.
	pub dns_name: Option<String>,
	/// Engine type and version reported by the admin API.
	pub database_version: Option<String>,
	/// Mutually-authenticated TLS configuration for the server proxy.
	pub tls_config: Arc<ClientConfig>,
}
impl ConnectionInfo {
	/// Walk the preference list and return the first address the instance exposes.
	pub fn preferred_ip(&self, ip_types: &[IpType]) -> Result<&str> {
		ip_types.iter().find_map(|kind| self.ip_addresses.get(kind)).map(String::as_str).ok_or_else(
			|| Error::IpTypeNotAvailable {
				instance: self.instance.to_string(),
				requested: ip_types.to_vec(),
			},
		)
	}

	/// Whether the client certificate has expired as of `now`.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expiration
	}
}
#[cfg(test)]
impl ConnectionInfo {
	/// Test-only bundle with a placeholder TLS configuration.
	pub(crate) fn for_tests(instance: &str, expiration: DateTime<Utc>) -> Self {
		crate::tls::ensure_crypto_provider_installed();

		Self {
			instance: InstanceName::parse(instance).expect("instance name"),
			expiration,
			ip_addresses: HashMap::from([(IpType::Primary, "10.0.0.1".to_owned())]),
			dns_name: None,
			database_version: None,
			tls_config: Arc::new(
				ClientConfig::builder()
					.with_root_certificates(rustls::RootCertStore::empty())
					.with_no_client_auth(),
			),
		}
	}
}
