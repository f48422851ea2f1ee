//! Error types shared by the token store, coordinator, and request pipeline.

// self
use crate::{_prelude::*, authenticator::AuthenticatorError};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// A refresh cycle failed or was abandoned.
	#[error(transparent)]
	Refresh(#[from] RefreshError),
	/// The session cannot be restored; the host application must start a new login.
	#[error(transparent)]
	Unauthenticated(#[from] UnauthenticatedError),
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS) while sending a request.
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl Error {
	/// Returns `true` if the host should redirect the user to a login flow.
	pub fn requires_login(&self) -> bool {
		matches!(self, Self::Unauthenticated(_) | Self::Refresh(_))
	}
}

/// Outcome of a failed refresh cycle, delivered to every waiter of that cycle.
#[derive(Clone, Debug, ThisError)]
pub enum RefreshError {
	/// The current record carries no refresh token (or there is no record at all).
	#[error("No refresh token is available for this session.")]
	NoRefreshToken,
	/// The authenticator rejected or could not complete the renewal.
	#[error("Authenticator failed to renew the session.")]
	AuthenticatorFailure(#[source] Arc<AuthenticatorError>),
	/// The session was cleared (logout) while the refresh was pending.
	#[error("Session was cleared before the refresh completed.")]
	SessionCleared,
	/// The refresh task ended without reporting an outcome.
	#[error("Refresh task ended without reporting an outcome.")]
	Abandoned,
}

/// Raised to pipeline callers when no valid session could be restored.
#[derive(Debug, ThisError)]
pub enum UnauthenticatedError {
	/// Refreshing after a rejected request failed.
	#[error("Session expired and could not be refreshed.")]
	RefreshFailed(#[source] RefreshError),
	/// The request was rejected again after a successful refresh.
	#[error("Request was rejected with status {status} after the session was refreshed.")]
	RejectedAfterRefresh {
		/// HTTP status of the replayed request.
		status: u16,
	},
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] http::Error),
	/// Token type or access token cannot be encoded as a header value.
	#[error("Token cannot be encoded as an Authorization header value.")]
	InvalidAuthorizationHeader(#[from] http::header::InvalidHeaderValue),
	/// Refresh threshold must not be negative.
	#[error("Refresh threshold must not be negative.")]
	NegativeRefreshThreshold,
	/// Refresh threshold exceeds the accepted maximum.
	#[error("Refresh threshold must not exceed {max_secs} seconds.")]
	RefreshThresholdTooLarge {
		/// Largest accepted threshold, in seconds.
		max_secs: i64,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn refresh_failures_keep_their_source() {
		let inner = AuthenticatorError::InvalidGrant { reason: "refresh token revoked".into() };
		let err = Error::from(UnauthenticatedError::RefreshFailed(
			RefreshError::AuthenticatorFailure(Arc::new(inner)),
		));

		assert!(err.requires_login());

		let refresh = StdError::source(&err).expect("Unauthenticated error should expose a source.");

		assert_eq!(refresh.to_string(), "Authenticator failed to renew the session.");

		let authenticator =
			refresh.source().expect("Refresh error should expose the authenticator failure.");

		assert!(authenticator.to_string().contains("refresh token revoked"));
	}

	#[test]
	fn transport_errors_do_not_require_login() {
		let err = Error::from(TransportError::Io(std::io::Error::other("connection reset")));

		assert!(!err.requires_login());
	}
}
