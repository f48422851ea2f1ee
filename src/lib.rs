//! Bearer-token lifecycle for HTTP clients: one token store, a single-flight refresh
//! coordinator with proactive renewal, and a request pipeline that recovers from 401s.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod authenticator;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod obs;
pub mod pipeline;
pub mod store;
pub mod transport;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and scripted collaborators for tests; enabled via `cfg(test)` or
	//! the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use tokio::sync::Semaphore;
	// self
	use crate::{
		auth::{ScopeSet, TokenRecord},
		authenticator::{Authenticator, AuthenticatorError, AuthenticatorFuture},
		clock::{Clock, ManualClock},
		config::SessionConfig,
		coordinator::RefreshCoordinator,
		store::MemoryStorage,
		transport::{HttpRequest, HttpTransport, TransportFuture},
	};

	/// Fixed instant every scripted fixture starts from.
	pub fn fixture_instant() -> OffsetDateTime {
		time::macros::datetime!(2025-06-01 12:00 UTC)
	}

	/// Builds a record that expires `expires_in` after `now`.
	pub fn record_expiring(
		access: &str,
		refresh: Option<&str>,
		now: OffsetDateTime,
		expires_in: Duration,
	) -> TokenRecord {
		let scope = ScopeSet::new(["openid", "chat"]).expect("Fixture scopes should be valid.");
		let mut builder =
			TokenRecord::builder(scope).access_token(access).issued_at(now).expires_in(expires_in);

		if let Some(refresh) = refresh {
			builder = builder.refresh_token(refresh);
		}

		builder.build().expect("Fixture record should build.")
	}

	/// Authenticator that replays scripted outcomes and counts every call.
	///
	/// When gated, each call waits for a permit released by [`ScriptedAuthenticator::release`].
	pub struct ScriptedAuthenticator {
		clock: ManualClock,
		outcomes: Mutex<VecDeque<Result<String, String>>>,
		calls: AtomicUsize,
		seen: Mutex<Vec<String>>,
		gate: Option<Semaphore>,
		lifetime: Duration,
	}
	impl ScriptedAuthenticator {
		/// Creates an ungated authenticator; unscripted calls mint `access-<n>` tokens.
		pub fn new(clock: ManualClock) -> Self {
			Self {
				clock,
				outcomes: Default::default(),
				calls: AtomicUsize::new(0),
				seen: Default::default(),
				gate: None,
				lifetime: Duration::hours(1),
			}
		}

		/// Makes every call wait until [`Self::release`] grants a permit.
		pub fn gated(mut self) -> Self {
			self.gate = Some(Semaphore::new(0));

			self
		}

		/// Overrides the lifetime of minted tokens (defaults to one hour).
		pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
			self.lifetime = lifetime;

			self
		}

		/// Queues a successful renewal minting the provided access token.
		pub fn succeed_with(self, access: &str) -> Self {
			self.outcomes.lock().push_back(Ok(access.to_owned()));

			self
		}

		/// Queues a failed renewal.
		pub fn fail_with(self, reason: &str) -> Self {
			self.outcomes.lock().push_back(Err(reason.to_owned()));

			self
		}

		/// Releases `permits` gated calls.
		pub fn release(&self, permits: usize) {
			if let Some(gate) = &self.gate {
				gate.add_permits(permits);
			}
		}

		/// Number of renew calls observed so far.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		/// Refresh tokens presented to the authenticator, in call order.
		pub fn seen_refresh_tokens(&self) -> Vec<String> {
			self.seen.lock().clone()
		}
	}
	impl Authenticator for ScriptedAuthenticator {
		fn renew<'a>(&'a self, refresh_token: &'a str) -> AuthenticatorFuture<'a> {
			Box::pin(async move {
				let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

				self.seen.lock().push(refresh_token.to_owned());

				if let Some(gate) = &self.gate {
					gate.acquire().await.expect("Gate semaphore should stay open.").forget();
				}

				let outcome =
					self.outcomes.lock().pop_front().unwrap_or_else(|| Ok(format!("access-{call}")));

				match outcome {
					Ok(access) => Ok(TokenRecord::builder(ScopeSet::default())
						.access_token(access)
						.issued_at(self.clock.now())
						.expires_in(self.lifetime)
						.build()
						.expect("Scripted record should build.")),
					Err(reason) => Err(AuthenticatorError::InvalidGrant { reason }),
				}
			})
		}
	}

	/// Transport that answers with scripted statuses and records the requests it saw.
	///
	/// A transport built with [`ScriptedTransport::rejecting`] answers 401 to every request
	/// carrying that authorization value. When gated, each request waits for a permit
	/// released by [`ScriptedTransport::release`].
	#[derive(Default)]
	pub struct ScriptedTransport {
		statuses: Mutex<VecDeque<u16>>,
		rejected: Option<String>,
		authorizations: Mutex<Vec<Option<String>>>,
		gate: Option<Semaphore>,
	}
	impl ScriptedTransport {
		/// Creates a transport that replies with `statuses` in order, then 200.
		pub fn new(statuses: impl IntoIterator<Item = u16>) -> Self {
			Self { statuses: Mutex::new(statuses.into_iter().collect()), ..Default::default() }
		}

		/// Creates a transport that rejects `authorization` with 401 and accepts the rest.
		pub fn rejecting(authorization: &str) -> Self {
			Self { rejected: Some(authorization.to_owned()), ..Default::default() }
		}

		/// Makes every request wait until [`Self::release`] grants a permit.
		pub fn gated(mut self) -> Self {
			self.gate = Some(Semaphore::new(0));

			self
		}

		/// Releases `permits` gated requests.
		pub fn release(&self, permits: usize) {
			if let Some(gate) = &self.gate {
				gate.add_permits(permits);
			}
		}

		/// Authorization header values observed for each request (None when absent).
		pub fn authorizations(&self) -> Vec<Option<String>> {
			self.authorizations.lock().clone()
		}
	}
	impl HttpTransport for ScriptedTransport {
		type Error = std::io::Error;

		fn execute(&self, request: HttpRequest) -> TransportFuture<'_, Self::Error> {
			Box::pin(async move {
				let authorization = request
					.headers()
					.get(::http::header::AUTHORIZATION)
					.and_then(|value| value.to_str().ok())
					.map(str::to_owned);

				self.authorizations.lock().push(authorization.clone());

				if let Some(gate) = &self.gate {
					gate.acquire().await.expect("Gate semaphore should stay open.").forget();
				}

				let status = if self.rejected.is_some() && self.rejected == authorization {
					401
				} else {
					self.statuses.lock().pop_front().unwrap_or(200)
				};
				let response = ::http::Response::builder()
					.status(status)
					.body(Vec::new())
					.expect("Scripted response should build.");

				Ok(response)
			})
		}
	}

	/// Builds a reqwest client that trusts the self-signed certificates served by httpmock.
	#[cfg(feature = "reqwest")]
	pub fn test_reqwest_client() -> ReqwestClient {
		ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.")
	}

	/// Builds a coordinator backed by in-memory storage, the scripted authenticator, and a
	/// manual clock pinned to [`fixture_instant`].
	pub fn build_test_coordinator(
		config: SessionConfig,
		script: impl FnOnce(ScriptedAuthenticator) -> ScriptedAuthenticator,
	) -> (RefreshCoordinator, Arc<ScriptedAuthenticator>, Arc<MemoryStorage>, ManualClock) {
		let clock = ManualClock::new(fixture_instant());
		let authenticator = Arc::new(script(ScriptedAuthenticator::new(clock.clone())));
		let storage = Arc::new(MemoryStorage::default());
		let coordinator = RefreshCoordinator::builder(authenticator.clone())
			.storage(storage.clone())
			.clock(clock.clone())
			.config(config)
			.build();

		(coordinator, authenticator, storage, clock)
	}

	/// Lets spawned tasks run until the runtime is idle.
	pub async fn settle() {
		for _ in 0..8 {
			tokio::task::yield_now().await;
		}

		tokio::time::sleep(std::time::Duration::from_millis(1)).await;
	}
}

mod _prelude {
	pub use std::{
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::{Arc, Weak},
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use http;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
