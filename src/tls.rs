//! Instance-identity TLS: client configuration, server verification, and socket assembly.
//!
//! Server verification intentionally bypasses hostname checking. Connections are opened against
//! whichever IP the caller prefers, so the peer is authenticated by the instance connection name
//! embedded in the server certificate (subject CN `project:instance`, or the instance DNS name in
//! the SAN for DNS-named instances), chained to the per-instance CA from the admin API.

// crates.io
use rustls::{
	ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
	client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
	crypto::{CryptoProvider, WebPkiSupportedAlgorithms},
	pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime},
	server::ParsedCertificate,
};
use tokio::net::TcpStream;
use tokio_rustls::{TlsConnector, client::TlsStream};
use x509_parser::{
	extensions::GeneralName,
	prelude::{FromDer, X509Certificate},
};
// self
use crate::{_prelude::*, config::InstanceName};

/// Ensure a rustls crypto provider is installed as the process default.
///
/// Idempotent and best-effort: if the application already installed a provider, that one wins.
pub(crate) fn ensure_crypto_provider_installed() {
	static INSTALLED: std::sync::OnceLock<()> = std::sync::OnceLock::new();

	INSTALLED.get_or_init(|| {
		let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
	});
}

/// Parse every certificate in a PEM document into owned DER form.
pub(crate) fn certs_from_pem(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
	Ok(rustls_pemfile::certs(&mut &*pem).collect::<std::io::Result<Vec<_>>>()?)
}

/// Build a trust store from DER-encoded CA certificates.
pub(crate) fn roots_from_certs(certs: &[CertificateDer<'static>]) -> Result<Arc<RootCertStore>> {
	let mut store = RootCertStore::empty();
	let (added, ignored) = store.add_parsable_certificates(certs.iter().cloned());

	if store.is_empty() {
		return Err(Error::CertParse(
			"no usable CA certificate in the server CA bundle".into(),
		));
	}

	tracing::trace!(added, ignored, "loaded server CA certificates");

	Ok(Arc::new(store))
}

/// Extract the `notAfter` instant from a DER certificate.
pub(crate) fn certificate_not_after(cert: &CertificateDer<'_>) -> Result<DateTime<Utc>> {
	let (_, parsed) = X509Certificate::from_der(cert.as_ref())
		.map_err(|err| Error::CertParse(format!("{err:?}")))?;
	let timestamp = parsed.validity().not_after.timestamp();

	DateTime::<Utc>::from_timestamp(timestamp, 0)
		.ok_or_else(|| Error::CertParse("certificate notAfter is out of range".into()))
}

/// Build the mutually-authenticated client configuration for one instance.
pub(crate) fn client_config(
	instance: &InstanceName,
	dns_name: Option<&str>,
	server_roots: &[CertificateDer<'static>],
	client_chain: Vec<CertificateDer<'static>>,
	private_key_pkcs8_der: &[u8],
) -> Result<Arc<ClientConfig>> {
	ensure_crypto_provider_installed();

	let roots = roots_from_certs(server_roots)?;
	let verifier =
		InstanceIdentityVerifier::new(instance.server_identity(), dns_name.map(str::to_owned), roots)?;
	let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(private_key_pkcs8_der.to_vec()));
	let config = ClientConfig::builder()
		.dangerous()
		.with_custom_certificate_verifier(Arc::new(verifier))
		.with_client_auth_cert(client_chain, key)?;

	Ok(Arc::new(config))
}

/// Open a TCP connection and complete the TLS handshake with the instance's configuration.
///
/// `host` may be an IP literal or, for Private Service Connect endpoints, a DNS name. Keep-alive
/// and TCP_NODELAY are enabled before the handshake. The server name indication is the target
/// address itself; the verifier ignores it.
pub(crate) async fn connect(
	config: Arc<ClientConfig>,
	host: &str,
	port: u16,
) -> std::io::Result<TlsStream<TcpStream>> {
	let stream = TcpStream::connect((host, port)).await?;

	stream.set_nodelay(true)?;
	socket2::SockRef::from(&stream).set_keepalive(true)?;

	let server_name = ServerName::try_from(host.to_owned())
		.map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

	TlsConnector::from(config).connect(server_name, stream).await
}

/// Server certificate verifier that authenticates the instance rather than a hostname.
#[derive(Debug)]
pub struct InstanceIdentityVerifier {
	expected_identity: String,
	expected_dns: Option<String>,
	roots: Arc<RootCertStore>,
	algorithms: WebPkiSupportedAlgorithms,
}
impl InstanceIdentityVerifier {
	/// Create a verifier trusting `roots` and expecting the given subject identity.
	pub fn new(
		expected_identity: String,
		expected_dns: Option<String>,
		roots: Arc<RootCertStore>,
	) -> Result<Self> {
		let provider = CryptoProvider::get_default().ok_or_else(|| {
			Error::Tls(rustls::Error::General("no process-level crypto provider installed".into()))
		})?;

		Ok(Self {
			expected_identity,
			expected_dns,
			roots,
			algorithms: provider.signature_verification_algorithms,
		})
	}

	fn verify_instance_identity(
		&self,
		end_entity: &CertificateDer<'_>,
	) -> std::result::Result<(), rustls::Error> {
		let (_, cert) = X509Certificate::from_der(end_entity.as_ref()).map_err(|err| {
			rustls::Error::General(format!("unable to parse server certificate: {err:?}"))
		})?;

		// Classic server certificates carry "project:instance" in the subject CN.
		for cn in cert.subject().iter_common_name() {
			if let Ok(value) = cn.as_str()
				&& value == self.expected_identity
			{
				return Ok(());
			}
		}

		// DNS-named instances present SAN entries instead.
		if let Some(expected_dns) = &self.expected_dns
			&& let Ok(Some(san)) = cert.subject_alternative_name()
		{
			for name in &san.value.general_names {
				if let GeneralName::DNSName(dns) = name
					&& dns.eq_ignore_ascii_case(expected_dns)
				{
					return Ok(());
				}
			}
		}

		Err(rustls::Error::General(format!(
			"server certificate does not identify instance '{}'",
			self.expected_identity
		)))
	}
}
impl ServerCertVerifier for InstanceIdentityVerifier {
	fn verify_server_cert(
		&self,
		end_entity: &CertificateDer<'_>,
		intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		now: UnixTime,
	) -> std::result::Result<ServerCertVerified, rustls::Error> {
		let cert = ParsedCertificate::try_from(end_entity)?;

		rustls::client::verify_server_cert_signed_by_trust_anchor(
			&cert,
			&self.roots,
			intermediates,
			now,
			self.algorithms.all,
		)?;
		// Identity is checked only after the chain cryptographically verifies.
		self.verify_instance_identity(end_entity)?;

		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
		rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.algorithms.supported_schemes()
	}
}
