//! `grant_type=refresh_token` authenticator backed by reqwest.

// std
use std::time::Duration as StdDuration;
// crates.io
use reqwest::{StatusCode, header::ACCEPT, redirect::Policy};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenRecord},
	authenticator::{Authenticator, AuthenticatorError, AuthenticatorFuture},
	clock::{Clock, SystemClock},
	error::{ConfigError, TransportError},
};

/// Renews sessions by exchanging the refresh token at an OAuth 2.0 token endpoint.
///
/// Token endpoints answer directly, so the default client does not follow redirects. Each
/// renewal carries its own timeout (30 seconds unless overridden) and reports expiry as an
/// absolute instant computed from the configured clock.
#[derive(Clone)]
pub struct RefreshGrantAuthenticator {
	token_endpoint: Url,
	client_id: String,
	client_secret: Option<String>,
	http_client: ReqwestClient,
	timeout: StdDuration,
	clock: Arc<dyn Clock>,
}
impl RefreshGrantAuthenticator {
	/// Default per-request timeout.
	pub const DEFAULT_TIMEOUT: StdDuration = StdDuration::from_secs(30);

	/// Creates an authenticator for a public client.
	pub fn new(token_endpoint: Url, client_id: impl Into<String>) -> Result<Self, ConfigError> {
		let http_client = ReqwestClient::builder().redirect(Policy::none()).build()?;

		Ok(Self::with_http_client(token_endpoint, client_id, http_client))
	}

	/// Creates an authenticator that reuses a caller-provided reqwest client.
	pub fn with_http_client(
		token_endpoint: Url,
		client_id: impl Into<String>,
		http_client: ReqwestClient,
	) -> Self {
		Self {
			token_endpoint,
			client_id: client_id.into(),
			client_secret: None,
			http_client,
			timeout: Self::DEFAULT_TIMEOUT,
			clock: Arc::new(SystemClock),
		}
	}

	/// Sends `client_secret` in the form body for confidential clients.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Overrides the per-request timeout.
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Overrides the clock used to turn `expires_in` into an absolute instant.
	pub fn with_clock(mut self, clock: impl Clock) -> Self {
		self.clock = Arc::new(clock);

		self
	}

	async fn exchange(&self, refresh_token: &str) -> Result<TokenRecord, AuthenticatorError> {
		let mut form = vec![
			("grant_type", "refresh_token"),
			("refresh_token", refresh_token),
			("client_id", self.client_id.as_str()),
		];

		if let Some(secret) = self.client_secret.as_deref() {
			form.push(("client_secret", secret));
		}

		let response = self
			.http_client
			.post(self.token_endpoint.clone())
			.header(ACCEPT, "application/json")
			.form(&form)
			.timeout(self.timeout)
			.send()
			.await
			.map_err(map_reqwest_error)?;
		let status = response.status();
		let issued_at = self.clock.now();
		let body = response.bytes().await.map_err(map_reqwest_error)?;

		if !status.is_success() {
			return Err(classify_error_response(status, &body));
		}

		let mut deserializer = serde_json::Deserializer::from_slice(&body);
		let payload: TokenEndpointResponse =
			serde_path_to_error::deserialize(&mut deserializer).map_err(|source| {
				AuthenticatorError::TokenResponseParse { source, status: Some(status.as_u16()) }
			})?;

		payload.into_record(issued_at)
	}
}
impl Authenticator for RefreshGrantAuthenticator {
	fn renew<'a>(&'a self, refresh_token: &'a str) -> AuthenticatorFuture<'a> {
		Box::pin(self.exchange(refresh_token))
	}
}
impl Debug for RefreshGrantAuthenticator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshGrantAuthenticator")
			.field("token_endpoint", &self.token_endpoint.as_str())
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.field("timeout", &self.timeout)
			.finish()
	}
}

#[derive(Deserialize)]
struct TokenEndpointResponse {
	access_token: String,
	#[serde(default)]
	token_type: Option<String>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	id_token: Option<String>,
	#[serde(default)]
	scope: Option<String>,
}
impl TokenEndpointResponse {
	fn into_record(self, issued_at: OffsetDateTime) -> Result<TokenRecord, AuthenticatorError> {
		let expires_in = self.expires_in.ok_or(AuthenticatorError::MissingExpiresIn)?;

		if expires_in <= 0 {
			return Err(AuthenticatorError::NonPositiveExpiresIn);
		}

		// Providers that send malformed scope strings still issued a usable token.
		let scope =
			self.scope.as_deref().and_then(|raw| raw.parse::<ScopeSet>().ok()).unwrap_or_default();
		let token_type = match self.token_type {
			Some(kind) if kind.eq_ignore_ascii_case(TokenRecord::DEFAULT_TOKEN_TYPE) =>
				TokenRecord::DEFAULT_TOKEN_TYPE.to_owned(),
			Some(kind) if !kind.trim().is_empty() => kind,
			_ => TokenRecord::DEFAULT_TOKEN_TYPE.to_owned(),
		};
		let mut builder = TokenRecord::builder(scope)
			.access_token(self.access_token)
			.token_type(token_type)
			.issued_at(issued_at)
			.expires_in(Duration::seconds(expires_in));

		if let Some(refresh) = self.refresh_token {
			builder = builder.refresh_token(refresh);
		}
		if let Some(id_token) = self.id_token {
			builder = builder.id_token(id_token);
		}

		builder.build().map_err(|err| AuthenticatorError::TokenEndpoint {
			message: err.to_string(),
			status: Some(StatusCode::OK.as_u16()),
		})
	}
}

#[derive(Deserialize)]
struct TokenEndpointError {
	error: String,
	#[serde(default)]
	error_description: Option<String>,
}

fn classify_error_response(status: StatusCode, body: &[u8]) -> AuthenticatorError {
	let Ok(parsed) = serde_json::from_slice::<TokenEndpointError>(body) else {
		return AuthenticatorError::TokenEndpoint {
			message: format!("HTTP {status}"),
			status: Some(status.as_u16()),
		};
	};
	let reason = parsed.error_description.unwrap_or_else(|| parsed.error.clone());

	match parsed.error.as_str() {
		"invalid_grant" | "invalid_token" => AuthenticatorError::InvalidGrant { reason },
		"token_revoked" => AuthenticatorError::Revoked,
		_ => AuthenticatorError::TokenEndpoint {
			message: format!("{}: {reason}", parsed.error),
			status: Some(status.as_u16()),
		},
	}
}

fn map_reqwest_error(err: ReqwestError) -> AuthenticatorError {
	if err.is_timeout() {
		AuthenticatorError::Timeout
	} else {
		TransportError::from(err).into()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use httpmock::prelude::*;
	use time::macros;
	// self
	use super::*;
	use crate::{_preludet::*, auth::TokenRecordBuilderError, clock::ManualClock};

	#[test]
	fn response_expiry_becomes_absolute() {
		let issued = macros::datetime!(2025-03-01 08:00 UTC);
		let payload: TokenEndpointResponse = serde_json::from_str(
			"{\"access_token\":\"a\",\"token_type\":\"bearer\",\"expires_in\":1800,\"scope\":\"chat openid\"}",
		)
		.expect("Payload should parse.");
		let record = payload.into_record(issued).expect("Record should build.");

		assert_eq!(record.expires_at, macros::datetime!(2025-03-01 08:30 UTC));
		assert_eq!(record.token_type, "Bearer");
		assert!(record.scope.contains("openid"));
		assert!(record.refresh_token.is_none());
	}

	#[test]
	fn response_without_expiry_is_rejected() {
		let issued = macros::datetime!(2025-03-01 08:00 UTC);
		let missing: TokenEndpointResponse =
			serde_json::from_str("{\"access_token\":\"a\"}").expect("Payload should parse.");
		let negative: TokenEndpointResponse =
			serde_json::from_str("{\"access_token\":\"a\",\"expires_in\":0}")
				.expect("Payload should parse.");

		assert!(matches!(missing.into_record(issued), Err(AuthenticatorError::MissingExpiresIn)));
		assert!(matches!(
			negative.into_record(issued),
			Err(AuthenticatorError::NonPositiveExpiresIn)
		));
	}

	#[test]
	fn oversized_expiry_is_an_endpoint_error() {
		let issued = macros::datetime!(2025-03-01 08:00 UTC);
		let payload: TokenEndpointResponse = serde_json::from_str(&format!(
			"{{\"access_token\":\"a\",\"expires_in\":{}}}",
			i64::MAX / 2
		))
		.expect("Payload should parse.");

		match payload.into_record(issued) {
			Err(AuthenticatorError::TokenEndpoint { message, status: Some(200) }) =>
				assert_eq!(message, TokenRecordBuilderError::ExpiryOutOfRange.to_string()),
			other => panic!("Unexpected conversion result: {other:?}."),
		}
	}

	#[test]
	fn error_bodies_are_classified() {
		let invalid = classify_error_response(
			StatusCode::BAD_REQUEST,
			b"{\"error\":\"invalid_grant\",\"error_description\":\"refresh token expired\"}",
		);

		assert!(matches!(&invalid, AuthenticatorError::InvalidGrant { reason } if reason == "refresh token expired"));
		assert!(invalid.is_credential_rejection());

		let opaque = classify_error_response(StatusCode::BAD_GATEWAY, b"<html>upstream</html>");

		assert!(matches!(opaque, AuthenticatorError::TokenEndpoint { status: Some(502), .. }));

		let other = classify_error_response(
			StatusCode::UNAUTHORIZED,
			b"{\"error\":\"invalid_client\"}",
		);

		assert!(!other.is_credential_rejection());
	}

	#[tokio::test]
	async fn renews_against_a_tls_token_endpoint() {
		let server = MockServer::start_async().await;
		let token = server
			.mock_async(|when, then| {
				when.method(POST)
					.path("/token")
					.body_includes("grant_type=refresh_token")
					.body_includes("refresh_token=refresh-1");
				then.status(200)
					.header("content-type", "application/json")
					.body("{\"access_token\":\"fresh\",\"expires_in\":600}");
			})
			.await;
		let endpoint =
			Url::parse(&server.url("/token")).expect("Mock token endpoint should parse successfully.");
		let authenticator =
			RefreshGrantAuthenticator::with_http_client(endpoint, "client", test_reqwest_client())
				.with_clock(ManualClock::new(fixture_instant()));
		let record = authenticator.renew("refresh-1").await.expect("Renewal should succeed.");

		assert_eq!(record.access_token.expose(), "fresh");
		assert_eq!(record.expires_at, fixture_instant() + Duration::minutes(10));

		token.assert_async().await;
	}
}
