//! End-to-end socket tests: mutual TLS against an in-process server proxy.

// std
use std::time::Duration;
// crates.io
use cloudsql_connector::{ConnectionConfig, Error};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
// self
use crate::support;

#[tokio::test]
async fn completes_a_mutual_tls_handshake_and_moves_bytes() {
	support::init_tracing();
	support::ensure_crypto_provider();

	let authority = support::TestAuthority::new();
	// The server proxy presents "project:instance" in its subject, not a hostname.
	let proxy = support::TlsProxy::start(&authority, "my-project:my-db").await;
	let server = support::start_admin_api(authority, "127.0.0.1").await;
	let registry = support::registry_for(&server, proxy.port);
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let mut connection = registry.connect(&config).await.expect("handshaken connection");

	connection.write_all(b"ping").await.expect("write");

	let mut echoed = [0_u8; 4];

	connection.read_exact(&mut echoed).await.expect("read");
	assert_eq!(&echoed, b"ping");

	registry.close();
}

#[tokio::test]
async fn rejects_a_proxy_with_the_wrong_identity() {
	support::init_tracing();
	support::ensure_crypto_provider();

	let authority = support::TestAuthority::new();
	// Correctly signed certificate, wrong instance in the subject.
	let proxy = support::TlsProxy::start(&authority, "other-project:other-db").await;
	let server = support::start_admin_api(authority, "127.0.0.1").await;
	let registry = support::registry_for(&server, proxy.port);
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let err = registry.connect(&config).await.expect_err("identity mismatch");

	assert!(matches!(err, Error::Handshake { .. }), "got {err:?}");

	registry.close();
}

#[tokio::test]
async fn connection_failures_force_a_refresh() {
	support::init_tracing();
	support::ensure_crypto_provider();

	let authority = support::TestAuthority::new();
	let server = support::start_admin_api(authority, "127.0.0.1").await;
	// Grab a port with nothing listening on it.
	let port = {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");

		listener.local_addr().expect("addr").port()
	};
	let registry = support::registry_for(&server, port);
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let requests_before = {
		// Warm the cache so the connect failure is a socket failure, not a fetch failure.
		registry.host_ip(&config).await.expect("warm cache");

		server.received_requests().await.expect("requests").len()
	};
	let err = registry.connect(&config).await.expect_err("nothing is listening");

	assert!(matches!(err, Error::Handshake { .. }), "got {err:?}");

	// The failure sheds the cached certificates: a fresh fetch must reach the admin API.
	tokio::time::sleep(Duration::from_millis(500)).await;

	let requests_after = server.received_requests().await.expect("requests").len();

	assert!(
		requests_after > requests_before,
		"expected a forced refresh to call the admin API ({requests_before} -> {requests_after})"
	);

	registry.close();
}
