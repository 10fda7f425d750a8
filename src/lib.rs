//! Asynchronous Cloud SQL connector — ephemeral-certificate caching, proactive refresh, and
//! instance-identity mutual TLS for managed database instances.
//!
//! Given only an instance connection name of the form `project:region:instance`, the connector
//! obtains the instance metadata and a short-lived client certificate from the admin API, keeps
//! both fresh ahead of expiry, and hands the driver a connected, handshaken TLS socket.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod admin;
pub mod cache;
pub mod config;
pub mod keys;
#[cfg(feature = "metrics")] pub mod metrics;
pub mod rate_limit;
pub mod registry;
pub mod tls;

mod error;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}
#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	admin::{AccessToken, StaticTokenSource, TokenSource},
	cache::{ConnectionInfo, ConnectionInfoCache},
	config::{AuthType, ConnectionConfig, InstanceName, IpType},
	error::{Error, Result},
	keys::ClientKeyPair,
	registry::{Connection, ConnectorRegistry, RegistryBuilder},
};
