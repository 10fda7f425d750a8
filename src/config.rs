//! Connection configuration and instance connection names.
//!
//! A [`ConnectionConfig`] captures everything a driver shim hands the connector for one logical
//! database: the instance connection name, the IP-type preference, the authentication mode, and
//! the optional Unix-socket bypass.

// std
use std::{fmt, str::FromStr};
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// IP address classes an instance may expose.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IpType {
	/// Public (primary) address of the instance.
	Primary,
	/// VPC-internal address.
	Private,
	/// Private Service Connect endpoint.
	Psc,
}
impl IpType {
	/// Wire tag used by the admin API for this IP class.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Primary => "PRIMARY",
			Self::Private => "PRIVATE",
			Self::Psc => "PSC",
		}
	}
}
impl FromStr for IpType {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self> {
		// "PUBLIC" is the legacy driver-facing alias for the primary address.
		match value.trim().to_ascii_uppercase().as_str() {
			"PRIMARY" | "PUBLIC" => Ok(Self::Primary),
			"PRIVATE" => Ok(Self::Private),
			"PSC" => Ok(Self::Psc),
			other => Err(Error::Validation {
				field: "ip_types",
				reason: format!("Unknown IP type '{other}'; expected PUBLIC, PRIVATE, or PSC."),
			}),
		}
	}
}
impl fmt::Display for IpType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Authentication modes for the database protocol layer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthType {
	/// Built-in database authentication; the TLS layer only proves the client's identity.
	#[default]
	Password,
	/// IAM database authentication; the OAuth token doubles as the database password.
	Iam,
}

/// Parsed instance connection name.
///
/// The canonical form is `project:region:instance`; legacy domain-scoped projects
/// (`domain.com:project:region:instance`) are accepted and keep the domain prefix as part of the
/// project segment.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InstanceName {
	project: String,
	region: String,
	name: String,
}
impl InstanceName {
	/// Parse and validate a connection name.
	pub fn parse(value: &str) -> Result<Self> {
		let parts = value.split(':').collect::<Vec<_>>();
		let (project, region, name) = match parts.as_slice() {
			[project, region, name] => ((*project).to_owned(), *region, *name),
			[domain, project, region, name] => (format!("{domain}:{project}"), *region, *name),
			_ => {
				return Err(Error::InvalidInstanceName {
					name: value.to_owned(),
					reason: "expected the form \"project:region:instance\"",
				});
			},
		};

		for segment in [project.as_str(), region, name] {
			if segment.is_empty() {
				return Err(Error::InvalidInstanceName {
					name: value.to_owned(),
					reason: "segments must not be empty",
				});
			}
			if !segment
				.bytes()
				.all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'.'))
			{
				return Err(Error::InvalidInstanceName {
					name: value.to_owned(),
					reason: "segments may only contain lowercase letters, digits, '-', and '.'",
				});
			}
		}

		Ok(Self { project, region: region.to_owned(), name: name.to_owned() })
	}

	/// Project id, including any legacy domain prefix.
	pub fn project(&self) -> &str {
		&self.project
	}

	/// Region the instance runs in.
	pub fn region(&self) -> &str {
		&self.region
	}

	/// Instance id within the project.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Identity embedded in the subject of the server certificate (`project:instance`).
	pub fn server_identity(&self) -> String {
		format!("{}:{}", self.project, self.name)
	}
}
impl fmt::Display for InstanceName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}:{}", self.project, self.region, self.name)
	}
}
impl FromStr for InstanceName {
	type Err = Error;

	fn from_str(value: &str) -> Result<Self> {
		Self::parse(value)
	}
}
impl TryFrom<String> for InstanceName {
	type Error = Error;

	fn try_from(value: String) -> Result<Self> {
		Self::parse(&value)
	}
}
impl From<InstanceName> for String {
	fn from(value: InstanceName) -> Self {
		value.to_string()
	}
}

/// Per-connection settings handed to the connector by a driver shim.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
	/// Instance connection name.
	pub instance: InstanceName,
	/// Ordered IP-type preference used to select the endpoint address.
	pub ip_types: Vec<IpType>,
	/// Authentication mode requested by the driver.
	pub auth_type: AuthType,
	/// Optional service account to impersonate for admin API calls.
	pub target_principal: Option<String>,
	/// Delegation chain for impersonated credentials, closest to the target first.
	pub delegates: Vec<String>,
	/// Unix domain socket path that bypasses the TLS path entirely.
	pub unix_socket_path: Option<String>,
	/// Suffix appended to the Unix socket path when not already present.
	pub unix_socket_path_suffix: Option<String>,
}
impl ConnectionConfig {
	/// Construct a configuration for the given connection name with default settings.
	pub fn new(instance: impl AsRef<str>) -> Result<Self> {
		Ok(Self {
			instance: InstanceName::parse(instance.as_ref())?,
			ip_types: vec![IpType::Primary, IpType::Private],
			auth_type: AuthType::default(),
			target_principal: None,
			delegates: Vec::new(),
			unix_socket_path: None,
			unix_socket_path_suffix: None,
		})
	}

	/// Replace the IP-type preference list.
	pub fn with_ip_types(mut self, ip_types: Vec<IpType>) -> Self {
		self.ip_types = ip_types;

		self
	}

	/// Set the authentication mode.
	pub fn with_auth_type(mut self, auth_type: AuthType) -> Self {
		self.auth_type = auth_type;

		self
	}

	/// Set the service account to impersonate.
	pub fn with_target_principal(mut self, target_principal: impl Into<String>) -> Self {
		self.target_principal = Some(target_principal.into());

		self
	}

	/// Set the impersonation delegation chain.
	pub fn with_delegates<I, S>(mut self, delegates: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.delegates = delegates.into_iter().map(Into::into).collect();

		self
	}

	/// Route the connection through a Unix domain socket instead of TLS.
	pub fn with_unix_socket_path(mut self, path: impl Into<String>) -> Self {
		self.unix_socket_path = Some(path.into());

		self
	}

	/// Set the Unix socket path suffix (e.g. `/.s.PGSQL.5432`).
	pub fn with_unix_socket_path_suffix(mut self, suffix: impl Into<String>) -> Self {
		self.unix_socket_path_suffix = Some(suffix.into());

		self
	}

	/// Parse a comma-separated preference list such as `"PUBLIC,PRIVATE"`.
	pub fn parse_ip_types(value: &str) -> Result<Vec<IpType>> {
		let types = value
			.split(',')
			.filter(|part| !part.trim().is_empty())
			.map(IpType::from_str)
			.collect::<Result<Vec<_>>>()?;

		if types.is_empty() {
			return Err(Error::Validation {
				field: "ip_types",
				reason: "Preference list must name at least one IP type.".into(),
			});
		}

		Ok(types)
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.ip_types.is_empty() {
			return Err(Error::Validation {
				field: "ip_types",
				reason: "Preference list must name at least one IP type.".into(),
			});
		}
		if self.target_principal.is_none() && !self.delegates.is_empty() {
			return Err(Error::Validation {
				field: "delegates",
				reason: "target_principal must be set when delegates are provided.".into(),
			});
		}

		Ok(())
	}
}
