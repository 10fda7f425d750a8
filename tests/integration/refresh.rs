//! Integration coverage for connection-info fetching, caching, and failure surfacing.

// std
use std::{sync::Arc, time::Duration};
// crates.io
use chrono::Datelike;
use cloudsql_connector::{ConnectionConfig, Error, IpType};
use serde_json::json;
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};
// self
use crate::support;

#[tokio::test]
async fn serves_connection_info_from_a_single_fetch() {
	support::init_tracing();

	let authority = support::TestAuthority::new();
	let server = support::start_admin_api(authority, "127.0.0.1").await;
	let registry = support::registry_for(&server, 3307);
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let cache = registry.cache_for(&config);
	let timeout = Duration::from_secs(20);
	let info = cache.connection_info(timeout).await.expect("initial fetch");

	assert_eq!(info.preferred_ip(&[IpType::Primary]).expect("primary"), "127.0.0.1");
	assert_eq!(info.expiration.year(), 2036, "expiry must come from the ephemeral certificate");
	assert_eq!(info.database_version.as_deref(), Some("POSTGRES_16"));

	// A second read is a cache hit; the admin API sees no new traffic.
	let requests_after_first = server.received_requests().await.expect("requests").len();
	let again = cache.connection_info(timeout).await.expect("cached value");

	assert_eq!(again.expiration, info.expiration);
	assert_eq!(server.received_requests().await.expect("requests").len(), requests_after_first);

	// Both endpoints carry the composed User-Agent.
	let requests = server.received_requests().await.expect("requests");

	assert!(requests.iter().all(|request| {
		request
			.headers
			.get("user-agent")
			.and_then(|value| value.to_str().ok())
			.is_some_and(|value| value.contains("cloudsql-connector/"))
	}));

	registry.close();
}

#[tokio::test]
async fn walks_the_ip_preference_list() {
	support::init_tracing();

	let authority = support::TestAuthority::new();
	let server = MockServer::start().await;

	support::mount_connect_settings(&server, &authority, &[("PRIMARY", "34.9.8.7")], "us-central1")
		.await;
	support::mount_ephemeral_cert(&server, authority).await;

	let registry = support::registry_for(&server, 3307);
	let preferring_private = ConnectionConfig::new(support::INSTANCE)
		.expect("config")
		.with_ip_types(vec![IpType::Private, IpType::Primary]);

	// The private address is absent, so the walk falls through to the primary one.
	assert_eq!(registry.host_ip(&preferring_private).await.expect("fallback"), "34.9.8.7");

	let private_only = ConnectionConfig::new(support::INSTANCE)
		.expect("config")
		.with_ip_types(vec![IpType::Private]);
	let err = registry.host_ip(&private_only).await.expect_err("no private address");

	assert!(matches!(
		err,
		Error::IpTypeNotAvailable { ref requested, .. } if requested == &[IpType::Private]
	));

	registry.close();
}

#[tokio::test]
async fn authorization_failures_surface_through_the_timeout() {
	support::init_tracing();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(support::SETTINGS_PATH))
		.respond_with(
			ResponseTemplate::new(403)
				.set_body_json(json!({ "error": { "code": 403, "message": "Access denied." } })),
		)
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(support::EPHEMERAL_PATH))
		.respond_with(
			ResponseTemplate::new(403)
				.set_body_json(json!({ "error": { "code": 403, "message": "Access denied." } })),
		)
		.mount(&server)
		.await;

	let registry = support::registry_for(&server, 3307);
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let cache = registry.cache_for(&config);
	let err = cache.connection_info(Duration::from_secs(10)).await.expect_err("must fail");

	match err {
		Error::RefreshFailed { source, .. } => {
			assert!(matches!(*source, Error::NotAuthorized { .. }), "got {source:?}");
		},
		other => panic!("expected RefreshFailed, got {other:?}"),
	}

	registry.close();
}

#[tokio::test]
async fn missing_instances_surface_not_found() {
	support::init_tracing();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path(support::SETTINGS_PATH))
		.respond_with(ResponseTemplate::new(404))
		.mount(&server)
		.await;
	Mock::given(method("POST"))
		.and(path(support::EPHEMERAL_PATH))
		.respond_with(ResponseTemplate::new(404))
		.mount(&server)
		.await;

	let registry = support::registry_for(&server, 3307);
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let err = registry.host_ip(&config).await.expect_err("must fail");

	match err {
		Error::RefreshFailed { source, .. } => {
			assert!(matches!(*source, Error::NotFound { .. }), "got {source:?}");
		},
		other => panic!("expected RefreshFailed, got {other:?}"),
	}

	registry.close();
}

#[tokio::test]
async fn region_mismatches_are_rejected() {
	support::init_tracing();

	let authority = support::TestAuthority::new();
	let server = MockServer::start().await;

	// The instance lives in europe-west1, but the connection name says us-central1.
	support::mount_connect_settings(&server, &authority, &[("PRIMARY", "127.0.0.1")], "europe-west1")
		.await;
	support::mount_ephemeral_cert(&server, authority).await;

	let registry = support::registry_for(&server, 3307);
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let cache = registry.cache_for(&config);
	let err = cache.connection_info(Duration::from_secs(10)).await.expect_err("must fail");

	match err {
		Error::RefreshFailed { source, .. } => {
			assert!(matches!(*source, Error::Validation { field: "instance", .. }), "got {source:?}");
		},
		other => panic!("expected RefreshFailed, got {other:?}"),
	}

	registry.close();
}

#[tokio::test]
async fn concurrent_lookups_share_one_cache() {
	support::init_tracing();

	let authority = support::TestAuthority::new();
	let server = support::start_admin_api(authority, "127.0.0.1").await;
	let registry = Arc::new(support::registry_for(&server, 3307));
	let config = ConnectionConfig::new(support::INSTANCE).expect("config");
	let mut lookups = Vec::new();

	for _ in 0..16 {
		let registry = registry.clone();
		let config = config.clone();

		lookups.push(tokio::spawn(async move { registry.cache_for(&config) }));
	}

	let mut caches = Vec::new();

	for lookup in lookups {
		caches.push(lookup.await.expect("lookup"));
	}

	assert!(caches.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));

	registry.close();
}
