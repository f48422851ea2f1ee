//! Authenticator contract used by the refresh coordinator to renew a session.
//!
//! The coordinator never talks to an identity provider directly. It hands the current
//! refresh token to an [`Authenticator`] and receives a complete [`TokenRecord`] back. The
//! built-in [`RefreshGrantAuthenticator`] speaks the `refresh_token` grant against a token
//! endpoint; hosts with a silent-renew flow implement the trait themselves.

#[cfg(feature = "reqwest")] pub mod refresh_grant;

#[cfg(feature = "reqwest")] pub use refresh_grant::RefreshGrantAuthenticator;

// self
use crate::{_prelude::*, auth::TokenRecord, error::TransportError};

/// Boxed future returned by [`Authenticator::renew`].
pub type AuthenticatorFuture<'a> =
	Pin<Box<dyn Future<Output = Result<TokenRecord, AuthenticatorError>> + 'a + Send>>;

/// Obtains a fresh token record in exchange for a refresh token.
///
/// Implementations carry their own network timeout; a timeout is reported as an error and
/// treated like any other refresh failure. The coordinator calls `renew` at most once per
/// refresh cycle, from a spawned task, so the returned future must be `Send`.
pub trait Authenticator
where
	Self: 'static + Send + Sync,
{
	/// Renews the session identified by `refresh_token`.
	fn renew<'a>(&'a self, refresh_token: &'a str) -> AuthenticatorFuture<'a>;
}

/// Failures reported by an [`Authenticator`].
#[derive(Debug, ThisError)]
pub enum AuthenticatorError {
	/// The provider rejected the refresh token (expired, reused, or unknown).
	#[error("Provider rejected the refresh token: {reason}.")]
	InvalidGrant {
		/// Provider- or authenticator-supplied reason string.
		reason: String,
	},
	/// The refresh token has been revoked.
	#[error("Refresh token has been revoked.")]
	Revoked,
	/// Provider returned an unexpected response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint responded with JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned a non-positive `expires_in`.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// The renewal did not finish within the configured timeout.
	#[error("Renewal timed out.")]
	Timeout,
	/// Network-level failure.
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl AuthenticatorError {
	/// Returns `true` if the provider definitively refused the credential.
	pub fn is_credential_rejection(&self) -> bool {
		matches!(self, Self::InvalidGrant { .. } | Self::Revoked)
	}
}
