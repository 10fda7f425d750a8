//! Shared fixtures: a certificate authority, a mock admin API, and a TLS server proxy.

// std
use std::{
	sync::{Arc, OnceLock},
	time::Duration,
};
// crates.io
use cloudsql_connector::{ClientKeyPair, ConnectorRegistry, StaticTokenSource};
use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, SignatureAlgorithm};
use rsa::{RsaPublicKey, pkcs1::EncodeRsaPublicKey, pkcs8::DecodePublicKey};
use rustls::{
	RootCertStore, ServerConfig,
	pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer},
	server::WebPkiClientVerifier,
};
use serde_json::{Value, json};
use tokio::{
	io::{AsyncReadExt, AsyncWriteExt},
	net::TcpListener,
	task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;
use url::Url;
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{method, path},
};

pub const INSTANCE: &str = "my-project:us-central1:my-db";
pub const SETTINGS_PATH: &str = "/sql/v1beta4/projects/my-project/instances/my-db/connectSettings";
pub const EPHEMERAL_PATH: &str =
	"/sql/v1beta4/projects/my-project/instances/my-db:generateEphemeralCert";

/// One RSA key pair shared by the whole test binary; generation is expensive in debug builds.
pub fn shared_client_keys() -> ClientKeyPair {
	static KEYS: OnceLock<ClientKeyPair> = OnceLock::new();

	KEYS.get_or_init(|| ClientKeyPair::generate().expect("client key pair")).clone()
}

/// Certificate authority standing in for the per-instance server CA.
pub struct TestAuthority {
	ca_key: KeyPair,
	ca_cert: rcgen::Certificate,
}
impl TestAuthority {
	pub fn new() -> Arc<Self> {
		let ca_key = KeyPair::generate().expect("ca key");
		let mut params = CertificateParams::default();

		params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
		params.distinguished_name.push(DnType::CommonName, "Test Instance CA");

		let ca_cert = params.self_signed(&ca_key).expect("ca cert");

		Arc::new(Self { ca_key, ca_cert })
	}

	pub fn ca_pem(&self) -> String {
		self.ca_cert.pem()
	}

	/// Sign a submitted SPKI PEM public key into a client certificate, the way the admin API's
	/// ephemeral-certificate endpoint does.
	pub fn issue_ephemeral(&self, public_key_pem: &str) -> String {
		let public_key = RsaPublicKey::from_public_key_pem(public_key_pem).expect("submitted key");
		let pkcs1 = public_key.to_pkcs1_der().expect("pkcs1").as_bytes().to_vec();
		let subject_key =
			KeyPair::from_remote(Box::new(SubmittedPublicKey(pkcs1))).expect("remote key");
		let mut params = CertificateParams::default();

		params.distinguished_name.push(DnType::CommonName, "ephemeral");
		params.not_after = rcgen::date_time_ymd(2036, 1, 1);

		params.signed_by(&subject_key, &self.ca_cert, &self.ca_key).expect("ephemeral cert").pem()
	}

	/// Issue a server-proxy certificate carrying the given subject identity.
	pub fn issue_server(&self, identity: &str) -> (Vec<u8>, Vec<u8>) {
		let key = KeyPair::generate().expect("server key");
		let mut params = CertificateParams::default();

		params.distinguished_name.push(DnType::CommonName, identity);

		let cert = params.signed_by(&key, &self.ca_cert, &self.ca_key).expect("server cert");

		(cert.der().as_ref().to_vec(), key.serialize_der())
	}

	pub fn ca_der(&self) -> Vec<u8> {
		self.ca_cert.der().as_ref().to_vec()
	}
}

/// Signing-incapable key pair wrapping a public key submitted by the client under test.
struct SubmittedPublicKey(Vec<u8>);
impl rcgen::RemoteKeyPair for SubmittedPublicKey {
	fn public_key(&self) -> &[u8] {
		&self.0
	}

	fn sign(&self, _msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
		Err(rcgen::Error::RemoteKeyError)
	}

	fn algorithm(&self) -> &'static SignatureAlgorithm {
		&rcgen::PKCS_RSA_SHA256
	}
}

/// Mount the standard connectSettings + generateEphemeralCert mocks.
pub async fn start_admin_api(authority: Arc<TestAuthority>, primary_ip: &str) -> MockServer {
	let server = MockServer::start().await;

	mount_connect_settings(&server, &authority, &[("PRIMARY", primary_ip)], "us-central1").await;
	mount_ephemeral_cert(&server, authority).await;

	server
}

pub async fn mount_connect_settings(
	server: &MockServer,
	authority: &TestAuthority,
	addresses: &[(&str, &str)],
	region: &str,
) {
	let ip_addresses = addresses
		.iter()
		.map(|(kind, address)| json!({ "type": kind, "ipAddress": address }))
		.collect::<Vec<_>>();
	let body = json!({
		"kind": "sql#connectSettings",
		"serverCaCert": { "cert": authority.ca_pem() },
		"ipAddresses": ip_addresses,
		"region": region,
		"databaseVersion": "POSTGRES_16"
	});

	Mock::given(method("GET"))
		.and(path(SETTINGS_PATH))
		.respond_with(ResponseTemplate::new(200).set_body_json(body))
		.mount(server)
		.await;
}

pub async fn mount_ephemeral_cert(server: &MockServer, authority: Arc<TestAuthority>) {
	Mock::given(method("POST"))
		.and(path(EPHEMERAL_PATH))
		.respond_with(move |request: &Request| {
			let body = serde_json::from_slice::<Value>(&request.body).expect("json body");
			let public_key = body["public_key"].as_str().expect("public_key field");
			let pem = authority.issue_ephemeral(public_key);

			ResponseTemplate::new(200).set_body_json(json!({ "ephemeralCert": { "cert": pem } }))
		})
		.mount(server)
		.await;
}

/// Registry wired to the mock admin API.
pub fn registry_for(server: &MockServer, server_proxy_port: u16) -> ConnectorRegistry {
	ConnectorRegistry::builder()
		.api_endpoint(Url::parse(&server.uri()).expect("mock uri"))
		.token_source(Arc::new(StaticTokenSource::new("test-token")))
		.client_key_pair(shared_client_keys())
		.server_proxy_port(server_proxy_port)
		.refresh_timeout(Duration::from_secs(20))
		.min_refresh_interval(Duration::from_millis(50))
		.build()
		.expect("registry")
}

/// Echoing TLS server standing in for the instance's server proxy.
pub struct TlsProxy {
	pub port: u16,
	handle: JoinHandle<()>,
}
impl TlsProxy {
	/// Serve mutual TLS with a server certificate carrying `identity`, requiring client
	/// certificates signed by the authority.
	pub async fn start(authority: &TestAuthority, identity: &str) -> Self {
		let (cert_der, key_der) = authority.issue_server(identity);
		let mut roots = RootCertStore::empty();

		roots.add(authority.ca_der().into()).expect("ca root");

		let verifier =
			WebPkiClientVerifier::builder(Arc::new(roots)).build().expect("client verifier");
		let config = ServerConfig::builder()
			.with_client_cert_verifier(verifier)
			.with_single_cert(
				vec![cert_der.into()],
				PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_der)),
			)
			.expect("server config");
		let acceptor = TlsAcceptor::from(Arc::new(config));
		let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind proxy");
		let port = listener.local_addr().expect("proxy addr").port();
		let handle = tokio::spawn(async move {
			while let Ok((stream, _)) = listener.accept().await {
				let acceptor = acceptor.clone();

				tokio::spawn(async move {
					let Ok(mut tls) = acceptor.accept(stream).await else { return };
					let mut buffer = [0_u8; 1024];

					while let Ok(n) = tls.read(&mut buffer).await {
						if n == 0 || tls.write_all(&buffer[..n]).await.is_err() {
							break;
						}
					}

					let _ = tls.shutdown().await;
				});
			}
		});

		Self { port, handle }
	}
}
impl Drop for TlsProxy {
	fn drop(&mut self) {
		self.handle.abort();
	}
}

pub fn init_tracing() {
	let _ = tracing_subscriber::fmt::try_init();
}

pub fn ensure_crypto_provider() {
	static INSTALLED: OnceLock<()> = OnceLock::new();

	INSTALLED.get_or_init(|| {
		let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
	});
}
