//! Admin API integration: credentials, wire model, and the connection-info repository.

pub mod client;
pub mod model;

// std
use std::{
	fmt::{Debug, Formatter, Result as FmtResult},
	future::Future,
	pin::Pin,
};
// self
use crate::_prelude::*;

/// Boxed future returned by credential sources and refresh suppliers.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// OAuth access token presented to the admin API.
#[derive(Clone)]
pub struct AccessToken {
	token: String,
	expiry: Option<DateTime<Utc>>,
}
impl AccessToken {
	/// Wrap a bearer token with no known expiry.
	pub fn new(token: impl Into<String>) -> Self {
		Self { token: token.into(), expiry: None }
	}

	/// Attach the token's expiry; used to cap certificate lifetimes under IAM authentication.
	pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
		self.expiry = Some(expiry);

		self
	}

	/// The bearer token value.
	pub fn secret(&self) -> &str {
		&self.token
	}

	/// Expiry instant, when known.
	pub fn expiry(&self) -> Option<DateTime<Utc>> {
		self.expiry
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		// The token value never appears in logs.
		write!(f, "AccessToken(expiry: {:?})", self.expiry)
	}
}

/// Source of OAuth credentials for admin API calls.
///
/// Token acquisition (service accounts, workload identity, impersonation chains) is the
/// application's concern; the connector only requires something that yields a bearer token for
/// each request.
pub trait TokenSource: Debug + Send + Sync {
	/// Produce a token valid for the next admin API call.
	fn access_token(&self) -> BoxFuture<Result<AccessToken>>;
}

/// Token source returning a fixed token; useful for tests and short-lived tools.
#[derive(Clone, Debug)]
pub struct StaticTokenSource {
	token: AccessToken,
}
impl StaticTokenSource {
	/// Wrap a fixed bearer token.
	pub fn new(token: impl Into<String>) -> Self {
		Self { token: AccessToken::new(token) }
	}

	/// Wrap a fixed token carrying an expiry.
	pub fn with_token(token: AccessToken) -> Self {
		Self { token }
	}
}
impl TokenSource for StaticTokenSource {
	fn access_token(&self) -> BoxFuture<Result<AccessToken>> {
		let token = self.token.clone();

		Box::pin(async move { Ok(token) })
	}
}
