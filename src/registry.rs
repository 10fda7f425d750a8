//! Process-wide connector registry and driver entry points.
//!
//! The registry maps instance connection names to their caches (one cache per instance, created
//! lazily and retained for the process lifetime), owns the shared HTTP client and RSA key pair,
//! and exposes the `connect`-style entry points driver shims call.

// std
use std::{
	collections::HashMap,
	pin::Pin,
	sync::{Mutex, MutexGuard, PoisonError},
	task::{Context, Poll},
};
// crates.io
use reqwest::Client;
use tokio::{
	io::{AsyncRead, AsyncWrite, ReadBuf},
	net::TcpStream,
};
use tokio_rustls::client::TlsStream;
use url::Url;
// self
use crate::{
	_prelude::*,
	admin::{TokenSource, client::AdminApiClient},
	cache::ConnectionInfoCache,
	config::{ConnectionConfig, InstanceName},
	keys::SharedKeyPair,
};

/// TCP port the instance's TLS server proxy listens on.
pub const SERVER_PROXY_PORT: u16 = 3307;
/// Minimum interval between refresh attempts for one instance.
pub const MIN_REFRESH_DELAY: Duration = Duration::from_secs(30);
/// Default timeout budget for waiting on connection info.
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(30);
/// Deprecated environment variable forcing Unix-socket connectivity.
pub const FORCE_UNIX_SOCKET_ENV: &str = "CLOUD_SQL_FORCE_UNIX_SOCKET";

static GLOBAL: Mutex<Option<Arc<ConnectorRegistry>>> = Mutex::new(None);
static USER_AGENTS: Mutex<Vec<String>> = Mutex::new(Vec::new());
static APPLICATION_NAME: Mutex<String> = Mutex::new(String::new());

/// Builder for a [`ConnectorRegistry`].
#[derive(Debug, Default)]
pub struct RegistryBuilder {
	api_endpoint: Option<Url>,
	token_source: Option<Arc<dyn TokenSource>>,
	server_proxy_port: Option<u16>,
	refresh_timeout: Option<Duration>,
	min_refresh_interval: Option<Duration>,
	client_key_pair: Option<crate::keys::ClientKeyPair>,
}
impl RegistryBuilder {
	/// Create a builder with default configuration.
	pub fn new() -> Self {
		Self::default()
	}

	/// Override the admin API endpoint; used by tests and private API gateways.
	pub fn api_endpoint(mut self, endpoint: Url) -> Self {
		self.api_endpoint = Some(endpoint);

		self
	}

	/// Set the credential source used for every admin API call.
	pub fn token_source(mut self, token_source: Arc<dyn TokenSource>) -> Self {
		self.token_source = Some(token_source);

		self
	}

	/// Override the server proxy port (defaults to [`SERVER_PROXY_PORT`]).
	pub fn server_proxy_port(mut self, port: u16) -> Self {
		self.server_proxy_port = Some(port);

		self
	}

	/// Override the timeout budget applied to connection-info waits.
	pub fn refresh_timeout(mut self, timeout: Duration) -> Self {
		self.refresh_timeout = Some(timeout);

		self
	}

	/// Override the minimum interval between refresh attempts.
	pub fn min_refresh_interval(mut self, interval: Duration) -> Self {
		self.min_refresh_interval = Some(interval);

		self
	}

	/// Provide an existing RSA key pair instead of generating one on first use.
	pub fn client_key_pair(mut self, pair: crate::keys::ClientKeyPair) -> Self {
		self.client_key_pair = Some(pair);

		self
	}

	/// Finalise the configuration and construct a [`ConnectorRegistry`].
	pub fn build(self) -> Result<ConnectorRegistry> {
		let token_source = self.token_source.ok_or_else(|| Error::Validation {
			field: "token_source",
			reason: "A credential source is required to call the admin API.".into(),
		})?;
		let http = Client::builder()
			.user_agent(user_agent_string())
			.connect_timeout(Duration::from_secs(5))
			.build()?;
		let api_endpoint = match self.api_endpoint {
			Some(endpoint) => endpoint,
			None => Url::parse(crate::admin::client::DEFAULT_API_ENDPOINT)?,
		};

		Ok(ConnectorRegistry {
			http,
			api_endpoint,
			token_source,
			keys: match self.client_key_pair {
				Some(pair) => SharedKeyPair::with_key_pair(pair),
				None => SharedKeyPair::new(),
			},
			caches: Mutex::new(HashMap::new()),
			server_proxy_port: self.server_proxy_port.unwrap_or(SERVER_PROXY_PORT),
			refresh_timeout: self.refresh_timeout.unwrap_or(DEFAULT_REFRESH_TIMEOUT),
			min_refresh_interval: self.min_refresh_interval.unwrap_or(MIN_REFRESH_DELAY),
		})
	}
}

/// Process-wide connector state: one cache per instance, the shared HTTP client, and the shared
/// RSA key pair.
#[derive(Debug)]
pub struct ConnectorRegistry {
	http: Client,
	api_endpoint: Url,
	token_source: Arc<dyn TokenSource>,
	keys: SharedKeyPair,
	caches: Mutex<HashMap<InstanceName, Arc<ConnectionInfoCache>>>,
	server_proxy_port: u16,
	refresh_timeout: Duration,
	min_refresh_interval: Duration,
}
impl ConnectorRegistry {
	/// Create a [`RegistryBuilder`].
	pub fn builder() -> RegistryBuilder {
		RegistryBuilder::new()
	}

	/// Look up or create the cache for a configuration.
	///
	/// Lookup is an atomic compute-if-absent; concurrent callers for the same instance always
	/// observe the same cache.
	pub fn cache_for(&self, config: &ConnectionConfig) -> Arc<ConnectionInfoCache> {
		let mut caches = lock(&self.caches);

		caches
			.entry(config.instance.clone())
			.or_insert_with(|| {
				tracing::debug!(instance = %config.instance, "creating connection info cache");

				let api = AdminApiClient::new(
					self.http.clone(),
					self.api_endpoint.clone(),
					config.instance.clone(),
					config.auth_type,
					self.token_source.clone(),
					self.keys.clone(),
				);

				Arc::new(ConnectionInfoCache::new(
					api,
					config.instance.clone(),
					self.min_refresh_interval,
				))
			})
			.clone()
	}

	/// Open a connection according to `config`.
	///
	/// Unix-socket configurations bypass the TLS path entirely; everything else resolves the
	/// preferred address and completes a mutually-authenticated handshake with the server proxy.
	pub async fn connect(&self, config: &ConnectionConfig) -> Result<Connection> {
		config.validate()?;

		if let Some(path) = resolve_unix_socket_path(config) {
			#[cfg(unix)]
			{
				tracing::info!(instance = %config.instance, path = %path, "connecting via unix socket");

				return Ok(Connection::Unix(tokio::net::UnixStream::connect(path).await?));
			}
			#[cfg(not(unix))]
			{
				let _ = path;

				return Err(Error::Validation {
					field: "unix_socket_path",
					reason: "Unix domain sockets are not supported on this platform.".into(),
				});
			}
		}

		let cache = self.cache_for(config);
		let stream = cache
			.connect_tls(&config.ip_types, self.server_proxy_port, self.refresh_timeout)
			.await?;

		Ok(Connection::Tls(Box::new(stream)))
	}

	/// TLS configuration for `config`'s instance.
	pub async fn tls_config(&self, config: &ConnectionConfig) -> Result<Arc<rustls::ClientConfig>> {
		config.validate()?;

		self.cache_for(config).tls_config(self.refresh_timeout).await
	}

	/// Preferred host address for `config`'s instance.
	pub async fn host_ip(&self, config: &ConnectionConfig) -> Result<String> {
		config.validate()?;

		self.cache_for(config).preferred_ip(&config.ip_types, self.refresh_timeout).await
	}

	/// Close every cache and stop their refresh loops.
	pub fn close(&self) {
		let caches = std::mem::take(&mut *lock(&self.caches));

		for cache in caches.values() {
			cache.close();
		}
	}
}

/// A connected database socket.
pub enum Connection {
	/// Mutually-authenticated TLS stream to the server proxy.
	Tls(Box<TlsStream<TcpStream>>),
	/// Unix domain socket pass-through; the platform socket provides the security boundary.
	#[cfg(unix)]
	Unix(tokio::net::UnixStream),
}
impl AsyncRead for Connection {
	fn poll_read(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<std::io::Result<()>> {
		match self.get_mut() {
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
			#[cfg(unix)]
			Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
		}
	}
}
impl AsyncWrite for Connection {
	fn poll_write(
		self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<std::io::Result<usize>> {
		match self.get_mut() {
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
			#[cfg(unix)]
			Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
		}
	}

	fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		match self.get_mut() {
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
			#[cfg(unix)]
			Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
		}
	}

	fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
		match self.get_mut() {
			Self::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
			#[cfg(unix)]
			Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
		}
	}
}
impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Tls(_) => f.write_str("Connection::Tls"),
			#[cfg(unix)]
			Self::Unix(_) => f.write_str("Connection::Unix"),
		}
	}
}

/// Install a configured registry as the process-wide instance.
///
/// Fails with [`Error::AlreadyInitialized`] when a registry is already installed.
pub fn initialize(builder: RegistryBuilder) -> Result<Arc<ConnectorRegistry>> {
	let mut global = lock(&GLOBAL);

	if global.is_some() {
		return Err(Error::AlreadyInitialized);
	}

	let registry = Arc::new(builder.build()?);

	*global = Some(registry.clone());

	Ok(registry)
}

/// The process-wide registry installed by [`initialize`].
pub fn instance() -> Result<Arc<ConnectorRegistry>> {
	lock(&GLOBAL).clone().ok_or_else(|| Error::Validation {
		field: "registry",
		reason: "The connector registry is not initialized; call registry::initialize with a \
		         credential source first."
			.into(),
	})
}

/// Open a connection through the process-wide registry.
pub async fn connect(config: &ConnectionConfig) -> Result<Connection> {
	instance()?.connect(config).await
}

/// TLS configuration through the process-wide registry.
pub async fn tls_config(config: &ConnectionConfig) -> Result<Arc<rustls::ClientConfig>> {
	instance()?.tls_config(config).await
}

/// Preferred host address through the process-wide registry.
pub async fn host_ip(config: &ConnectionConfig) -> Result<String> {
	instance()?.host_ip(config).await
}

/// Register a driver artifact id appended to the admin API User-Agent.
pub fn add_artifact_id(artifact_id: &str) {
	let entry = format!("{artifact_id}/{}", env!("CARGO_PKG_VERSION"));
	let mut agents = lock(&USER_AGENTS);

	if !agents.contains(&entry) {
		agents.push(entry);
	}
}

/// Set the application name appended to the admin API User-Agent.
///
/// Fails once the process-wide registry exists: the shared HTTP client has already been built
/// with the previous value.
pub fn set_application_name(name: &str) -> Result<()> {
	if lock(&GLOBAL).is_some() {
		return Err(Error::AlreadyInitialized);
	}

	*lock(&APPLICATION_NAME) = name.to_owned();

	Ok(())
}

/// Tear down all process-wide state; intended for tests.
pub fn reset() {
	if let Some(registry) = lock(&GLOBAL).take() {
		registry.close();
	}

	lock(&USER_AGENTS).clear();
	lock(&APPLICATION_NAME).clear();
}

pub(crate) fn user_agent_string() -> String {
	let mut parts = vec![format!("cloudsql-connector/{}", env!("CARGO_PKG_VERSION"))];

	parts.extend(lock(&USER_AGENTS).iter().cloned());

	let application_name = lock(&APPLICATION_NAME).clone();

	if !application_name.is_empty() {
		parts.push(application_name);
	}

	parts.join(" ")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn resolve_unix_socket_path(config: &ConnectionConfig) -> Option<String> {
	let base = if let Some(path) = &config.unix_socket_path {
		path.clone()
	} else if std::env::var_os(FORCE_UNIX_SOCKET_ENV).is_some() {
		tracing::warn!(
			"the {FORCE_UNIX_SOCKET_ENV} environment variable is deprecated; set unix_socket_path \
			 on the connection configuration instead"
		);

		format!("/cloudsql/{}", config.instance)
	} else {
		return None;
	};

	Some(apply_unix_socket_suffix(base, config.unix_socket_path_suffix.as_deref()))
}

// Empty and absent suffixes are equivalent; an already-suffixed path is left alone.
fn apply_unix_socket_suffix(path: String, suffix: Option<&str>) -> String {
	match suffix {
		Some(suffix) if !suffix.is_empty() && !path.ends_with(suffix) => format!("{path}{suffix}"),
		_ => path,
	}
}
