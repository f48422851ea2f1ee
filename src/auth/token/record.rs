//! Immutable token record, expiry arithmetic, and builder.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, token::secret::TokenSecret},
};

/// Lifecycle status of a record relative to an instant and a refresh threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// More than the threshold remains before expiry.
	Active,
	/// Still valid, but within the refresh threshold.
	ExpiringSoon,
	/// The expiry instant has been reached.
	Expired,
}

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when the token type is blank.
	#[error("Token type cannot be empty.")]
	EmptyTokenType,
	/// Issued when `issued_at + expires_in` falls outside the representable date range.
	#[error("Expiry is out of range.")]
	ExpiryOutOfRange,
}

/// Immutable snapshot of the credentials issued for a session.
///
/// Records are never mutated once shared; the token store replaces them wholesale so a
/// reader always observes either the previous record or the next one. `expires_at` is an
/// absolute instant (stored as Unix seconds) so that re-reading a persisted record never
/// re-derives expiry from a relative lifetime.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Bearer credential attached to outbound requests.
	pub access_token: TokenSecret,
	/// Refresh credential; `None` means the session can only be restored by logging in again.
	pub refresh_token: Option<TokenSecret>,
	/// OpenID Connect ID token, when the provider issued one.
	pub id_token: Option<TokenSecret>,
	/// Authorization scheme, `Bearer` unless the provider says otherwise.
	pub token_type: String,
	/// Absolute expiry instant.
	#[serde(with = "time::serde::timestamp")]
	pub expires_at: OffsetDateTime,
	/// Scopes granted to the access token.
	#[serde(default)]
	pub scope: ScopeSet,
}
impl TokenRecord {
	/// Scheme used when the provider does not name one.
	pub const DEFAULT_TOKEN_TYPE: &'static str = "Bearer";

	/// Returns a builder for a record granting `scope`.
	pub fn builder(scope: ScopeSet) -> TokenRecordBuilder {
		TokenRecordBuilder::new(scope)
	}

	/// Time left before expiry; negative once expired.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		self.expires_at - now
	}

	/// Returns `true` once `now` reaches the expiry instant.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}

	/// Returns `true` if at most `threshold` remains before expiry (expired records included).
	pub fn is_expiring_soon_at(&self, now: OffsetDateTime, threshold: Duration) -> bool {
		self.remaining_at(now) <= threshold
	}

	/// Classifies the record at `now` against the refresh threshold.
	pub fn status_at(&self, now: OffsetDateTime, threshold: Duration) -> TokenStatus {
		if self.is_expired_at(now) {
			TokenStatus::Expired
		} else if self.is_expiring_soon_at(now, threshold) {
			TokenStatus::ExpiringSoon
		} else {
			TokenStatus::Active
		}
	}

	/// Returns `true` if a refresh credential is available.
	pub fn can_refresh(&self) -> bool {
		self.refresh_token.is_some()
	}

	/// Value for the `Authorization` header, e.g. `Bearer eyJ...`.
	pub fn authorization_value(&self) -> String {
		format!("{} {}", self.token_type, self.access_token.expose())
	}

	/// Fills credentials a renewal response omitted from the record it renewed.
	///
	/// Providers that do not rotate refresh tokens leave `refresh_token` out of the response,
	/// and OIDC providers may skip the ID token on refresh; both stay usable.
	pub fn inherit_from(mut self, previous: &TokenRecord) -> Self {
		if self.refresh_token.is_none() {
			self.refresh_token = previous.refresh_token.clone();
		}
		if self.id_token.is_none() {
			self.id_token = previous.id_token.clone();
		}
		if self.scope.is_empty() {
			self.scope = previous.scope.clone();
		}

		self
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expires_at", &self.expires_at)
			.field("scope", &self.scope)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug)]
pub struct TokenRecordBuilder {
	scope: ScopeSet,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	id_token: Option<TokenSecret>,
	token_type: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	fn new(scope: ScopeSet) -> Self {
		Self {
			scope,
			access_token: None,
			refresh_token: None,
			id_token: None,
			token_type: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the ID token value.
	pub fn id_token(mut self, token: impl Into<String>) -> Self {
		self.id_token = Some(TokenSecret::new(token));

		self
	}

	/// Overrides the authorization scheme (defaults to `Bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the instant a relative `expires_in` is measured from (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant; takes precedence over `expires_in`.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a lifetime relative to the issue instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self.access_token.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => self
				.issued_at
				.unwrap_or_else(OffsetDateTime::now_utc)
				.checked_add(delta)
				.ok_or(TokenRecordBuilderError::ExpiryOutOfRange)?,
			(None, None) => return Err(TokenRecordBuilderError::MissingExpiry),
		};
		let token_type = match self.token_type {
			Some(kind) if kind.trim().is_empty() =>
				return Err(TokenRecordBuilderError::EmptyTokenType),
			Some(kind) => kind,
			None => TokenRecord::DEFAULT_TOKEN_TYPE.to_owned(),
		};

		Ok(TokenRecord {
			access_token,
			refresh_token: self.refresh_token,
			id_token: self.id_token,
			token_type,
			expires_at,
			scope: self.scope,
		})
	}
}
