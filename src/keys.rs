//! Process-wide RSA client key material.
//!
//! One key pair is generated per process and shared by every instance refresh: the public half is
//! submitted to the admin API to be signed into the ephemeral client certificate, the private
//! half backs the TLS client identity.

// std
use std::fmt::{Debug, Formatter, Result as FmtResult};
// crates.io
use rsa::{
	RsaPrivateKey, RsaPublicKey,
	pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
};
use tokio::sync::OnceCell;
// self
use crate::_prelude::*;

/// Size of the generated RSA key in bits.
pub const RSA_KEY_SIZE: usize = 2048;

/// An RSA key pair in the encodings the connector needs.
#[derive(Clone)]
pub struct ClientKeyPair {
	private_key_der: Arc<Vec<u8>>,
	public_key_pem: Arc<str>,
}
impl ClientKeyPair {
	/// Generate a fresh RSA-2048 key pair.
	///
	/// Key generation is CPU-bound; callers on an async runtime should go through
	/// [`SharedKeyPair`], which moves the work to a blocking thread.
	pub fn generate() -> Result<Self> {
		let mut rng = rand::thread_rng();
		let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_SIZE)
			.map_err(|err| Error::KeyGeneration(err.to_string()))?;
		let public_key = RsaPublicKey::from(&private_key);
		let private_key_der = private_key
			.to_pkcs8_der()
			.map_err(|err| Error::KeyGeneration(err.to_string()))?
			.as_bytes()
			.to_vec();
		let public_key_pem = public_key
			.to_public_key_pem(LineEnding::LF)
			.map_err(|err| Error::KeyGeneration(err.to_string()))?;

		Ok(Self { private_key_der: Arc::new(private_key_der), public_key_pem: public_key_pem.into() })
	}

	/// PKCS#8 DER encoding of the private key.
	pub fn private_key_der(&self) -> &[u8] {
		&self.private_key_der
	}

	/// SPKI PEM encoding of the public key, as submitted to the admin API.
	pub fn public_key_pem(&self) -> &str {
		&self.public_key_pem
	}
}
impl Debug for ClientKeyPair {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		// The private key never appears in logs.
		f.write_str("ClientKeyPair(rsa-2048)")
	}
}

/// Lazily generated key pair shared across every cache in a registry.
#[derive(Clone, Debug, Default)]
pub struct SharedKeyPair {
	cell: Arc<OnceCell<ClientKeyPair>>,
}
impl SharedKeyPair {
	/// Create an empty holder; the key pair is generated on first use.
	pub fn new() -> Self {
		Self::default()
	}

	/// Create a holder pre-seeded with an existing key pair; generation never runs.
	pub fn with_key_pair(pair: ClientKeyPair) -> Self {
		Self { cell: Arc::new(OnceCell::new_with(Some(pair))) }
	}

	/// Get the process key pair, generating it off the async runtime on first use.
	pub async fn get(&self) -> Result<ClientKeyPair> {
		let pair = self
			.cell
			.get_or_try_init(|| async {
				tracing::info!("first connection, generating RSA client key pair");

				tokio::task::spawn_blocking(ClientKeyPair::generate)
					.await
					.map_err(|err| Error::KeyGeneration(err.to_string()))?
			})
			.await?;

		Ok(pair.clone())
	}
}
