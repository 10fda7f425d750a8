//! Per-instance connection-info caching.

pub mod calculator;
pub mod info;
pub mod refresher;

pub use info::ConnectionInfo;
pub use refresher::Refresher;

// crates.io
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
// self
use crate::{
	_prelude::*,
	admin::client::AdminApiClient,
	cache::refresher::RefreshOp,
	config::{InstanceName, IpType},
	rate_limit::AsyncRateLimiter,
	tls,
};

/// Facade owning the refresh loop for one instance.
///
/// Caches are created lazily by the registry on first use and retained for the process lifetime
/// unless explicitly closed.
#[derive(Debug)]
pub struct ConnectionInfoCache {
	instance: InstanceName,
	refresher: Refresher,
}
impl ConnectionInfoCache {
	/// Create a cache that refreshes through the given admin API adapter.
	pub fn new(api: AdminApiClient, instance: InstanceName, min_refresh_interval: Duration) -> Self {
		let api = Arc::new(api);

		Self::with_refresh_op(
			instance,
			Arc::new(move || {
				let api = api.clone();

				Box::pin(async move { api.fetch_connection_info().await })
			}),
			min_refresh_interval,
		)
	}

	/// Create a cache around an arbitrary refresh supplier.
	pub fn with_refresh_op(
		instance: InstanceName,
		refresh_op: RefreshOp,
		min_refresh_interval: Duration,
	) -> Self {
		let refresher = Refresher::new(
			Arc::from(instance.to_string()),
			refresh_op,
			AsyncRateLimiter::new(min_refresh_interval),
		);

		Self { instance, refresher }
	}

	/// Wait up to `timeout` for the current connection info bundle.
	pub async fn connection_info(&self, timeout: Duration) -> Result<ConnectionInfo> {
		self.refresher.get(timeout).await
	}

	/// TLS configuration projection of the current bundle.
	pub async fn tls_config(&self, timeout: Duration) -> Result<Arc<ClientConfig>> {
		Ok(self.refresher.get(timeout).await?.tls_config)
	}

	/// First address of the preference list the instance actually exposes.
	pub async fn preferred_ip(&self, ip_types: &[IpType], timeout: Duration) -> Result<String> {
		Ok(self.refresher.get(timeout).await?.preferred_ip(ip_types)?.to_owned())
	}

	/// Open a handshaken TLS socket to the instance's server proxy.
	///
	/// Any failure on the socket path sheds the cached certificates via a force refresh before
	/// the error propagates, so a revoked or expired certificate heals on the next attempt.
	pub async fn connect_tls(
		&self,
		ip_types: &[IpType],
		port: u16,
		timeout: Duration,
	) -> Result<TlsStream<TcpStream>> {
		let info = self.refresher.get(timeout).await?;

		match self.try_connect(&info, ip_types, port).await {
			Ok(stream) => {
				#[cfg(feature = "metrics")]
				crate::metrics::record_connect_success(&self.instance.to_string());

				Ok(stream)
			},
			Err(err) => {
				tracing::warn!(
					instance = %self.instance,
					error = %err,
					"connection attempt failed, forcing refresh"
				);
				#[cfg(feature = "metrics")]
				crate::metrics::record_connect_error(&self.instance.to_string());
				self.refresher.force_refresh();

				Err(err)
			},
		}
	}

	/// Hint that the cached bundle is suspect (e.g. a handshake just failed).
	pub fn force_refresh(&self) {
		self.refresher.force_refresh();
	}

	/// Stop the refresh loop.
	pub fn close(&self) {
		self.refresher.close();
	}

	/// The instance this cache serves.
	pub fn instance(&self) -> &InstanceName {
		&self.instance
	}

	async fn try_connect(
		&self,
		info: &ConnectionInfo,
		ip_types: &[IpType],
		port: u16,
	) -> Result<TlsStream<TcpStream>> {
		let address = info.preferred_ip(ip_types)?;

		tls::connect(info.tls_config.clone(), address, port)
			.await
			.map_err(|source| Error::Handshake { instance: self.instance.to_string(), source })
	}
}
