//! Session configuration: refresh threshold and proactive scheduling.

// self
use crate::{_prelude::*, error::ConfigError};

/// Tunables shared by the token store, coordinator, and pipeline.
///
/// Deserializes from `{ "refresh_threshold_secs": 300, "proactive_refresh": true }`; both
/// fields are optional.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawSessionConfig")]
pub struct SessionConfig {
	refresh_threshold: Duration,
	proactive_refresh: bool,
}
impl SessionConfig {
	/// Refresh margin applied before natural expiry.
	pub const DEFAULT_REFRESH_THRESHOLD: Duration = Duration::seconds(300);
	/// Largest accepted refresh margin (one year).
	pub const MAX_REFRESH_THRESHOLD: Duration = Duration::days(365);
	/// Requests are replayed at most this many times after a 401.
	pub const MAX_RETRIES_PER_REQUEST: u8 = 1;

	/// Starts from the defaults.
	pub fn builder() -> SessionConfigBuilder {
		SessionConfigBuilder::default()
	}

	/// Window before `expires_at` in which a token counts as expiring soon.
	pub fn refresh_threshold(&self) -> Duration {
		self.refresh_threshold
	}

	/// Whether a timer refreshes the token ahead of expiry.
	pub fn proactive_refresh(&self) -> bool {
		self.proactive_refresh
	}
}
impl Default for SessionConfig {
	fn default() -> Self {
		Self { refresh_threshold: Self::DEFAULT_REFRESH_THRESHOLD, proactive_refresh: true }
	}
}
impl TryFrom<RawSessionConfig> for SessionConfig {
	type Error = ConfigError;

	fn try_from(raw: RawSessionConfig) -> Result<Self, Self::Error> {
		let mut builder = Self::builder();

		if let Some(secs) = raw.refresh_threshold_secs {
			builder = builder.refresh_threshold(Duration::seconds(secs));
		}
		if let Some(enabled) = raw.proactive_refresh {
			builder = builder.proactive_refresh(enabled);
		}

		builder.build()
	}
}

/// Builder for [`SessionConfig`].
#[derive(Clone, Debug)]
pub struct SessionConfigBuilder {
	refresh_threshold: Duration,
	proactive_refresh: bool,
}
impl SessionConfigBuilder {
	/// Overrides the refresh threshold (defaults to 300 seconds).
	pub fn refresh_threshold(mut self, threshold: Duration) -> Self {
		self.refresh_threshold = threshold;

		self
	}

	/// Enables or disables the proactive refresh timer.
	pub fn proactive_refresh(mut self, enabled: bool) -> Self {
		self.proactive_refresh = enabled;

		self
	}

	/// Validates and produces the configuration.
	pub fn build(self) -> Result<SessionConfig, ConfigError> {
		if self.refresh_threshold.is_negative() {
			return Err(ConfigError::NegativeRefreshThreshold);
		}
		if self.refresh_threshold > SessionConfig::MAX_REFRESH_THRESHOLD {
			return Err(ConfigError::RefreshThresholdTooLarge {
				max_secs: SessionConfig::MAX_REFRESH_THRESHOLD.whole_seconds(),
			});
		}

		Ok(SessionConfig {
			refresh_threshold: self.refresh_threshold,
			proactive_refresh: self.proactive_refresh,
		})
	}
}
impl Default for SessionConfigBuilder {
	fn default() -> Self {
		let defaults = SessionConfig::default();

		Self {
			refresh_threshold: defaults.refresh_threshold,
			proactive_refresh: defaults.proactive_refresh,
		}
	}
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSessionConfig {
	#[serde(default)]
	refresh_threshold_secs: Option<i64>,
	#[serde(default)]
	proactive_refresh: Option<bool>,
}
