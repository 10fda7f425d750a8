//! HTTP adapter for the connection-info endpoints of the admin API.

// std
use std::collections::HashMap;
// crates.io
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;
// self
use crate::{
	_prelude::*,
	admin::{
		AccessToken, TokenSource,
		model::{
			ApiErrorBody, ConnectSettings, GenerateEphemeralCertRequest,
			GenerateEphemeralCertResponse,
		},
	},
	cache::ConnectionInfo,
	config::{AuthType, InstanceName, IpType},
	keys::SharedKeyPair,
	tls,
};

/// Default admin API endpoint.
pub const DEFAULT_API_ENDPOINT: &str = "https://sqladmin.googleapis.com/";

/// Per-instance adapter resolving connection info from the admin API.
///
/// This layer performs no retries; retry policy lives entirely in the refresher.
#[derive(Clone, Debug)]
pub struct AdminApiClient {
	http: Client,
	endpoint: Url,
	instance: InstanceName,
	auth_type: AuthType,
	token_source: Arc<dyn TokenSource>,
	keys: SharedKeyPair,
}
impl AdminApiClient {
	/// Create an adapter for one instance.
	pub fn new(
		http: Client,
		endpoint: Url,
		instance: InstanceName,
		auth_type: AuthType,
		token_source: Arc<dyn TokenSource>,
		keys: SharedKeyPair,
	) -> Self {
		Self { http, endpoint, instance, auth_type, token_source, keys }
	}

	/// Fetch metadata and a signed ephemeral certificate, assembling a [`ConnectionInfo`].
	#[tracing::instrument(skip(self), fields(instance = %self.instance))]
	pub async fn fetch_connection_info(&self) -> Result<ConnectionInfo> {
		let started = Instant::now();
		let token = self.token_source.access_token().await?;
		let keys = self.keys.get().await?;
		let (settings, ephemeral) = tokio::try_join!(
			self.connect_settings(&token),
			self.generate_ephemeral_cert(&token, keys.public_key_pem()),
		)?;

		if !settings.region.is_empty() && settings.region != self.instance.region() {
			return Err(Error::Validation {
				field: "instance",
				reason: format!(
					"The configured region '{}' does not match the instance region '{}'; \
					 check the connection name.",
					self.instance.region(),
					settings.region
				),
			});
		}

		let server_ca = settings.server_ca_cert.as_ref().ok_or_else(|| Error::AdminApi {
			instance: self.instance.to_string(),
			status: StatusCode::OK.as_u16(),
			message: "connectSettings response carried no server CA certificate.".into(),
		})?;
		let server_roots = tls::certs_from_pem(server_ca.cert.as_bytes())?;
		let client_chain = tls::certs_from_pem(ephemeral.ephemeral_cert.cert.as_bytes())?;
		let leaf = client_chain.first().ok_or_else(|| {
			Error::CertParse("ephemeral certificate PEM contained no certificate".into())
		})?;
		let mut expiration = tls::certificate_not_after(leaf)?;

		// IAM tokens double as the database password; the certificate must not outlive them.
		if self.auth_type == AuthType::Iam
			&& let Some(token_expiry) = token.expiry()
		{
			expiration = expiration.min(token_expiry);
		}

		let ip_addresses = settings
			.ip_addresses
			.iter()
			.filter_map(|mapping| {
				mapping.kind.parse::<IpType>().ok().map(|kind| (kind, mapping.ip_address.clone()))
			})
			.collect::<HashMap<_, _>>();
		let tls_config = tls::client_config(
			&self.instance,
			settings.dns_name.as_deref(),
			&server_roots,
			client_chain,
			keys.private_key_der(),
		)?;

		tracing::debug!(
			elapsed = ?started.elapsed(),
			expiration = %expiration,
			addresses = ip_addresses.len(),
			"connection info fetch complete"
		);

		Ok(ConnectionInfo {
			instance: self.instance.clone(),
			expiration,
			ip_addresses,
			dns_name: settings.dns_name,
			database_version: settings.database_version,
			tls_config,
		})
	}

	async fn connect_settings(&self, token: &AccessToken) -> Result<ConnectSettings> {
		let url = self.endpoint.join(&format!(
			"sql/v1beta4/projects/{}/instances/{}/connectSettings",
			self.instance.project(),
			self.instance.name()
		))?;
		let response = self.http.get(url).bearer_auth(token.secret()).send().await?;

		self.deserialize_checked(response).await
	}

	async fn generate_ephemeral_cert(
		&self,
		token: &AccessToken,
		public_key_pem: &str,
	) -> Result<GenerateEphemeralCertResponse> {
		let url = self.endpoint.join(&format!(
			"sql/v1beta4/projects/{}/instances/{}:generateEphemeralCert",
			self.instance.project(),
			self.instance.name()
		))?;
		let body = GenerateEphemeralCertRequest {
			public_key: public_key_pem.to_owned(),
			access_token: (self.auth_type == AuthType::Iam)
				.then(|| token.secret().to_owned()),
		};
		let response = self.http.post(url).bearer_auth(token.secret()).json(&body).send().await?;

		self.deserialize_checked(response).await
	}

	async fn deserialize_checked<T>(&self, response: Response) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let status = response.status();

		match status {
			StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED =>
				Err(Error::NotAuthorized { instance: self.instance.to_string() }),
			StatusCode::NOT_FOUND => Err(Error::NotFound { instance: self.instance.to_string() }),
			status if !status.is_success() => {
				let message = api_error_message(&response.text().await.unwrap_or_default());

				Err(Error::AdminApi {
					instance: self.instance.to_string(),
					status: status.as_u16(),
					message,
				})
			},
			_ => Ok(response.json::<T>().await?),
		}
	}
}

fn api_error_message(body: &str) -> String {
	serde_json::from_str::<ApiErrorBody>(body)
		.ok()
		.and_then(|envelope| envelope.error)
		.map(|detail| detail.message)
		.filter(|message| !message.is_empty())
		.unwrap_or_else(|| {
			let message = body.trim().chars().take(256).collect::<String>();

			if message.is_empty() { "no response body".into() } else { message }
		})
}
