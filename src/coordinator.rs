//! Single-flight refresh coordination with proactive scheduling.
//!
//! [`RefreshCoordinator`] is the entry point every authenticated call site goes through
//! before sending a request. It answers from the current record while that record is
//! valid, joins or starts a refresh cycle when it is not, and keeps a one-shot timer armed
//! so the token is renewed `refresh_threshold` before it expires.
//!
//! A refresh cycle is owned by a spawned task rather than by the caller that started it:
//! every caller (the starter included) enqueues a waiter under the state mutex and awaits
//! its own channel. Dropping a caller therefore never leaves the `refreshing` flag set, and
//! N concurrent callers observing expiry produce exactly one authenticator call.

mod metrics;
mod schedule;
mod state;

pub use self::{metrics::RefreshMetrics, state::SessionState};

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{runtime::Handle, sync::oneshot};
// self
use self::{
	schedule::{ScheduledRefresh, proactive_delay},
	state::CoordinatorState,
};
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret, TokenStatus},
	authenticator::Authenticator,
	clock::{Clock, SystemClock},
	config::SessionConfig,
	error::RefreshError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{MemoryStorage, TokenStorage, TokenStore},
};

pub(crate) type RefreshOutcome = Result<Arc<TokenRecord>, RefreshError>;

/// Reason a refresh cycle was started; used as the span stage label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefreshTrigger {
	/// Explicit [`RefreshCoordinator::refresh`] call.
	Manual,
	/// A caller found the token expired.
	Expired,
	/// A caller found the token inside the refresh threshold.
	ExpiringSoon,
	/// The proactive timer fired.
	Proactive,
	/// The server rejected a request with 401.
	Rejected,
}
impl RefreshTrigger {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RefreshTrigger::Manual => "manual",
			RefreshTrigger::Expired => "expired",
			RefreshTrigger::ExpiringSoon => "expiring_soon",
			RefreshTrigger::Proactive => "proactive",
			RefreshTrigger::Rejected => "rejected",
		}
	}
}
impl Display for RefreshTrigger {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Process-wide coordinator for one authenticated session.
///
/// Cloning is cheap and every clone shares the same state, timer, and metrics. All methods
/// that start refresh work must run inside a Tokio runtime.
#[derive(Clone)]
pub struct RefreshCoordinator {
	core: Arc<Core>,
}
impl RefreshCoordinator {
	/// Starts building a coordinator around `authenticator`.
	pub fn builder(authenticator: Arc<dyn Authenticator>) -> RefreshCoordinatorBuilder {
		RefreshCoordinatorBuilder {
			authenticator,
			storage: None,
			clock: None,
			config: SessionConfig::default(),
		}
	}

	/// Token store sharing this coordinator's state.
	pub fn store(&self) -> TokenStore {
		TokenStore::new(self.core.clone())
	}

	/// Installs a freshly issued record (login).
	pub async fn login(&self, record: TokenRecord) {
		self.store().set(Some(record)).await;
	}

	/// Clears the session, cancels the timer, and fails every pending waiter.
	pub async fn logout(&self) {
		self.store().set(None).await;
	}

	/// Returns the access token a request should carry, refreshing first if it expired.
	///
	/// `None` means the caller must treat the session as unauthenticated.
	pub async fn get_valid_token(&self) -> Option<TokenSecret> {
		self.valid_record().await.map(|record| record.access_token.clone())
	}

	/// Like [`get_valid_token`](Self::get_valid_token) but returns the whole record.
	///
	/// Never suspends while the current record is valid. A record inside the refresh
	/// threshold is returned immediately and renewed in the background.
	pub async fn valid_record(&self) -> Option<Arc<TokenRecord>> {
		let now = self.core.clock.now();
		let current = self.core.state.lock().current.clone()?;

		match current.status_at(now, self.core.config.refresh_threshold()) {
			TokenStatus::Active => Some(current),
			TokenStatus::ExpiringSoon => {
				self.core.start_background_refresh(RefreshTrigger::ExpiringSoon);

				Some(current)
			},
			TokenStatus::Expired => match self.core.refresh(RefreshTrigger::Expired, None).await {
				Ok(record) => Some(record),
				Err(err) => {
					tracing::debug!(error = %err, "expired token could not be refreshed");

					None
				},
			},
		}
	}

	/// Runs (or joins) a refresh cycle and returns its outcome.
	///
	/// Concurrent callers share a single authenticator call. On failure the session is
	/// cleared and every caller of the cycle receives the same error.
	pub async fn refresh(&self) -> Result<Arc<TokenRecord>> {
		Ok(self.core.refresh(RefreshTrigger::Manual, None).await?)
	}

	/// Refresh used after the server rejected `rejected_access_token` with a 401.
	///
	/// When the installed token already differs from the rejected one and has not expired,
	/// another caller refreshed in the meantime and that token is returned without starting
	/// a new cycle.
	pub async fn refresh_rejected(
		&self,
		rejected_access_token: Option<&TokenSecret>,
	) -> Result<Arc<TokenRecord>> {
		let rejected = rejected_access_token.map(TokenSecret::expose).unwrap_or_default();

		Ok(self.core.refresh(RefreshTrigger::Rejected, Some(rejected)).await?)
	}

	/// Re-arms the proactive timer from the current record (cancelling any existing one).
	pub fn schedule_proactive_refresh(&self) {
		let mut state = self.core.state.lock();

		self.core.arm_timer_locked(&mut state);
	}

	/// Cancels the proactive timer, if any.
	pub fn cancel_scheduled_refresh(&self) {
		self.core.state.lock().timer = None;
	}

	/// Instant the proactive timer is set to fire at, if one is armed.
	pub fn next_scheduled_refresh(&self) -> Option<OffsetDateTime> {
		self.core.state.lock().timer.as_ref().map(ScheduledRefresh::fires_at)
	}

	/// Current position in the session lifecycle.
	pub fn state(&self) -> SessionState {
		let now = self.core.clock.now();

		self.core.state.lock().session_state(now, self.core.config.refresh_threshold())
	}

	/// Returns `true` while a token is held.
	pub fn is_authenticated(&self) -> bool {
		self.core.state.lock().current.is_some()
	}

	/// Refresh counters for this session.
	pub fn metrics(&self) -> Arc<RefreshMetrics> {
		self.core.metrics.clone()
	}

	/// Configuration the coordinator was built with.
	pub fn config(&self) -> &SessionConfig {
		&self.core.config
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinator")
			.field("state", &*self.core.state.lock())
			.field("config", &self.core.config)
			.finish()
	}
}

/// Builder for [`RefreshCoordinator`].
pub struct RefreshCoordinatorBuilder {
	authenticator: Arc<dyn Authenticator>,
	storage: Option<Arc<dyn TokenStorage>>,
	clock: Option<Arc<dyn Clock>>,
	config: SessionConfig,
}
impl RefreshCoordinatorBuilder {
	/// Persists records through `storage` (defaults to an in-memory store).
	pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
		self.storage = Some(storage);

		self
	}

	/// Overrides the clock used for expiry checks (defaults to the system clock).
	pub fn clock(mut self, clock: impl Clock) -> Self {
		self.clock = Some(Arc::new(clock));

		self
	}

	/// Overrides the session configuration.
	pub fn config(mut self, config: SessionConfig) -> Self {
		self.config = config;

		self
	}

	/// Builds a coordinator with no token installed.
	///
	/// Call [`TokenStore::restore`] afterwards to resume a persisted session.
	pub fn build(self) -> RefreshCoordinator {
		let core = Core {
			state: Mutex::new(CoordinatorState::default()),
			persist_lock: AsyncMutex::new(()),
			storage: self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::default())),
			authenticator: self.authenticator,
			clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
			config: self.config,
			metrics: Default::default(),
		};

		RefreshCoordinator { core: Arc::new(core) }
	}
}
impl Debug for RefreshCoordinatorBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshCoordinatorBuilder")
			.field("storage_set", &self.storage.is_some())
			.field("clock_set", &self.clock.is_some())
			.field("config", &self.config)
			.finish()
	}
}

/// Shared core behind every coordinator and token store handle of a session.
pub(crate) struct Core {
	pub(crate) state: Mutex<CoordinatorState>,
	persist_lock: AsyncMutex<()>,
	storage: Arc<dyn TokenStorage>,
	authenticator: Arc<dyn Authenticator>,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) config: SessionConfig,
	metrics: Arc<RefreshMetrics>,
}
impl Core {
	/// Installs `record` as the current one and re-arms (or cancels) the proactive timer.
	///
	/// On `None`, waiters of a pending cycle are failed with [`RefreshError::SessionCleared`].
	pub(crate) fn replace_locked(
		self: &Arc<Self>,
		state: &mut CoordinatorState,
		record: Option<Arc<TokenRecord>>,
	) {
		state.current = record;
		state.generation = state.generation.wrapping_add(1);

		self.arm_timer_locked(state);

		if state.current.is_none() {
			let failed = state.fail_waiters(RefreshError::SessionCleared);

			if failed > 0 {
				tracing::debug!(failed, "session cleared while waiters were pending");
			}
		}
	}

	/// Cancels the existing timer and arms a new one for the current record.
	pub(crate) fn arm_timer_locked(self: &Arc<Self>, state: &mut CoordinatorState) {
		// Dropping the previous handle aborts it; at most one timer is ever live.
		state.timer = None;

		if !self.config.proactive_refresh() {
			return;
		}

		let Some(current) = state.current.as_ref().filter(|record| record.can_refresh()) else {
			return;
		};
		let now = self.clock.now();
		let threshold = self.config.refresh_threshold();
		let lead = proactive_delay(current.expires_at, now, threshold);
		let fires_at = now.checked_add(lead).unwrap_or(current.expires_at);
		let delay = StdDuration::try_from(lead).unwrap_or(StdDuration::ZERO);

		tracing::debug!(%fires_at, delay_secs = delay.as_secs(), "proactive refresh scheduled");

		state.timer = ScheduledRefresh::arm(Arc::downgrade(self), delay, fires_at);
	}

	/// Starts a cycle without waiting for it, unless one is running or cannot succeed.
	pub(crate) fn start_background_refresh(self: &Arc<Self>, trigger: RefreshTrigger) {
		let launch = {
			let mut state = self.state.lock();

			// Without a refresh token the still-valid record is kept until it expires.
			if !state.current.as_ref().is_some_and(|record| record.can_refresh()) {
				return;
			}

			self.start_locked(&mut state, trigger)
		};

		if let Some(launch) = launch {
			launch.spawn();
		}
	}

	/// Joins the running cycle or starts one, then waits for its outcome.
	///
	/// With `rejected` set, an unexpired record whose access token differs from the rejected
	/// one is returned directly when no cycle is running.
	async fn refresh(
		self: &Arc<Self>,
		trigger: RefreshTrigger,
		rejected: Option<&str>,
	) -> Result<Arc<TokenRecord>, RefreshError> {
		let (receiver, launch) = {
			let mut state = self.state.lock();

			if let (Some(rejected), false) = (rejected, state.refreshing) {
				let now = self.clock.now();
				let superseding = state.current.as_ref().filter(|record| {
					!record.access_token.matches(rejected) && !record.is_expired_at(now)
				});

				if let Some(record) = superseding {
					return Ok(record.clone());
				}
			}

			let (tx, rx) = oneshot::channel();

			state.waiters.push_back(tx);

			if state.refreshing {
				self.metrics.record_joined();

				(rx, None)
			} else {
				(rx, self.start_locked(&mut state, trigger))
			}
		};

		if let Some(launch) = launch {
			launch.spawn();
		}

		// A dropped sender means the cycle's task was torn down before reporting.
		receiver.await.unwrap_or(Err(RefreshError::Abandoned))
	}

	/// Check-and-set of `refreshing`; the caller holds the state lock.
	///
	/// The returned launch must be spawned after the lock is released: a runtime that is
	/// shutting down drops the task in place, and the cycle's drop locks the state.
	fn start_locked(
		self: &Arc<Self>,
		state: &mut CoordinatorState,
		trigger: RefreshTrigger,
	) -> Option<CycleLaunch> {
		if state.refreshing {
			return None;
		}

		let Ok(runtime) = Handle::try_current() else {
			tracing::warn!(%trigger, "no Tokio runtime available; refresh was not started");

			state.fail_waiters(RefreshError::Abandoned);

			return None;
		};

		state.refreshing = true;

		let cycle = RefreshCycle {
			core: self.clone(),
			generation: state.generation,
			previous: state.current.clone(),
			finished: false,
		};

		Some(CycleLaunch { runtime, cycle, trigger })
	}

	/// Settles a cycle: installs or clears the record and releases every waiter.
	///
	/// Returns `true` if the change must be persisted.
	fn complete_locked(
		self: &Arc<Self>,
		state: &mut CoordinatorState,
		generation: u64,
		outcome: Result<TokenRecord, RefreshError>,
	) -> bool {
		state.refreshing = false;

		if state.generation != generation {
			// `set()` replaced the record mid-flight; the renewal belongs to a stale session.
			let delivered = state.current.clone().ok_or(RefreshError::SessionCleared);

			tracing::debug!("refresh result discarded; the session changed while in flight");
			state.release_waiters(&delivered);

			return false;
		}

		match outcome {
			Ok(record) => {
				let record = Arc::new(record);

				self.metrics.record_success();
				self.replace_locked(state, Some(record.clone()));

				let released = state.release_waiters(&Ok(record.clone()));

				tracing::debug!(released, expires_at = %record.expires_at, "refresh succeeded");
			},
			Err(err) => {
				self.metrics.record_failure();
				tracing::warn!(error = %err, "refresh failed; clearing session");
				state.release_waiters(&Err(err));
				self.replace_locked(state, None);
			},
		}

		true
	}

	async fn renew(&self, previous: Option<&TokenRecord>) -> Result<TokenRecord, RefreshError> {
		let Some(previous) = previous else {
			return Err(RefreshError::NoRefreshToken);
		};
		let Some(refresh_token) = previous.refresh_token.as_ref() else {
			return Err(RefreshError::NoRefreshToken);
		};

		self.metrics.record_attempt();

		match self.authenticator.renew(refresh_token.expose()).await {
			Ok(renewed) => Ok(renewed.inherit_from(previous)),
			Err(err) => Err(RefreshError::AuthenticatorFailure(Arc::new(err))),
		}
	}

	/// Writes the latest snapshot to storage; failures are logged, never propagated.
	pub(crate) async fn persist(&self) {
		// Serialized so the last write always reflects the latest in-memory state.
		let _persisting = self.persist_lock.lock().await;
		let snapshot = self.state.lock().current.as_deref().cloned();
		let clearing = snapshot.is_none();

		if let Err(err) = self.storage.save(snapshot).await {
			tracing::warn!(
				error = %err,
				clearing,
				"failed to persist token record; in-memory state remains authoritative"
			);
		}
	}

	pub(crate) async fn load(&self) -> Option<TokenRecord> {
		match self.storage.load().await {
			Ok(record) => record,
			Err(err) => {
				tracing::warn!(error = %err, "failed to load persisted token record");

				None
			},
		}
	}
}

struct CycleLaunch {
	runtime: Handle,
	cycle: RefreshCycle,
	trigger: RefreshTrigger,
}
impl CycleLaunch {
	fn spawn(self) {
		let CycleLaunch { runtime, cycle, trigger } = self;

		runtime.spawn(cycle.run(trigger));
	}
}

/// One refresh cycle, owned by a spawned task.
///
/// If the task is dropped before it reports (runtime shutdown, authenticator panic), the
/// drop releases the waiters with [`RefreshError::Abandoned`] and clears `refreshing`.
struct RefreshCycle {
	core: Arc<Core>,
	generation: u64,
	previous: Option<Arc<TokenRecord>>,
	finished: bool,
}
impl RefreshCycle {
	async fn run(mut self, trigger: RefreshTrigger) {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, trigger.as_str());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let core = self.core.clone();
		let previous = self.previous.clone();
		let outcome = span
			.instrument(async move {
				tracing::debug!("refresh cycle started");

				core.renew(previous.as_deref()).await
			})
			.await;

		obs::record_flow_outcome(
			KIND,
			if outcome.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure },
		);

		let persist = {
			let mut state = self.core.state.lock();

			self.finished = true;

			self.core.complete_locked(&mut state, self.generation, outcome)
		};

		if persist {
			self.core.persist().await;
		}
	}
}
impl Drop for RefreshCycle {
	fn drop(&mut self) {
		if self.finished {
			return;
		}

		let mut state = self.core.state.lock();

		state.refreshing = false;

		let abandoned = state.fail_waiters(RefreshError::Abandoned);

		tracing::warn!(abandoned, "refresh cycle ended without an outcome");
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// self
	use super::*;
	use crate::_preludet::*;

	fn manual_config() -> SessionConfig {
		SessionConfig::builder()
			.proactive_refresh(false)
			.build()
			.expect("Manual refresh config should build.")
	}

	#[tokio::test]
	async fn get_valid_token_without_a_session_is_none() {
		let (coordinator, authenticator, _, _) = build_test_coordinator(manual_config(), |a| a);

		assert!(coordinator.get_valid_token().await.is_none());
		assert_eq!(coordinator.state(), SessionState::Unauthenticated);
		assert_eq!(authenticator.calls(), 0);
	}

	#[tokio::test]
	async fn valid_token_is_returned_without_refreshing() {
		let (coordinator, authenticator, _, clock) = build_test_coordinator(manual_config(), |a| a);
		let now = clock.now();

		coordinator
			.login(record_expiring("original", Some("refresh-1"), now, Duration::seconds(1_000)))
			.await;
		clock.advance(Duration::seconds(500));

		let token = coordinator.get_valid_token().await.expect("Token should still be valid.");

		settle().await;

		assert_eq!(token.expose(), "original");
		assert_eq!(authenticator.calls(), 0);
		assert_eq!(coordinator.state(), SessionState::Valid);
	}

	#[tokio::test]
	async fn expiring_token_is_returned_and_renewed_in_background() {
		let (coordinator, authenticator, _, clock) =
			build_test_coordinator(manual_config(), |a| a.succeed_with("renewed"));
		let now = clock.now();

		coordinator
			.login(record_expiring("original", Some("refresh-1"), now, Duration::seconds(1_000)))
			.await;
		clock.advance(Duration::seconds(750));

		let token = coordinator.get_valid_token().await.expect("Token should still be valid.");

		assert_eq!(token.expose(), "original");

		settle().await;

		assert_eq!(authenticator.calls(), 1);
		assert_eq!(authenticator.seen_refresh_tokens(), vec!["refresh-1".to_owned()]);
		assert_eq!(
			coordinator.store().get().map(|record| record.access_token.expose().to_owned()),
			Some("renewed".into())
		);
	}

	#[tokio::test]
	async fn expired_token_waits_for_the_refresh() {
		let (coordinator, authenticator, storage, clock) =
			build_test_coordinator(manual_config(), |a| a.succeed_with("renewed"));
		let now = clock.now();

		coordinator
			.login(record_expiring("stale", Some("refresh-1"), now, Duration::seconds(60)))
			.await;
		clock.advance(Duration::seconds(61));

		assert_eq!(coordinator.state(), SessionState::Expired);

		let token = coordinator.get_valid_token().await.expect("Refresh should restore the token.");

		assert_eq!(token.expose(), "renewed");
		assert_eq!(authenticator.calls(), 1);

		settle().await;

		let persisted = storage.snapshot().expect("Renewed record should be persisted.");

		assert_eq!(persisted.access_token.expose(), "renewed");
		assert_eq!(
			persisted.refresh_token.as_ref().map(TokenSecret::expose),
			Some("refresh-1"),
			"Non-rotating providers keep the previous refresh token."
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_refreshes_hit_the_authenticator_once() {
		let (coordinator, authenticator, _, clock) =
			build_test_coordinator(manual_config(), |a| a.gated().succeed_with("shared"));

		coordinator
			.login(record_expiring("stale", Some("refresh-1"), clock.now(), Duration::seconds(10)))
			.await;

		let handles = (0..16)
			.map(|_| {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.refresh().await })
			})
			.collect::<Vec<_>>();

		while coordinator.metrics().joined() < 15 {
			tokio::time::sleep(StdDuration::from_millis(5)).await;
		}

		authenticator.release(1);

		for handle in handles {
			let record = handle
				.await
				.expect("Refresh task should not panic.")
				.expect("Every caller should share the successful outcome.");

			assert_eq!(record.access_token.expose(), "shared");
		}

		assert_eq!(authenticator.calls(), 1);
		assert_eq!(coordinator.metrics().attempts(), 1);
		assert_eq!(coordinator.metrics().successes(), 1);
	}

	#[tokio::test]
	async fn failed_refresh_releases_every_waiter_and_clears_the_session() {
		let (coordinator, authenticator, storage, clock) =
			build_test_coordinator(manual_config(), |a| a.gated().fail_with("revoked"));

		coordinator
			.login(record_expiring("stale", Some("refresh-1"), clock.now(), Duration::seconds(10)))
			.await;

		let handles = (0..8)
			.map(|_| {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.refresh().await })
			})
			.collect::<Vec<_>>();

		settle().await;
		authenticator.release(1);

		for handle in handles {
			let outcome = tokio::time::timeout(StdDuration::from_secs(1), handle)
				.await
				.expect("Waiters must be released in bounded time.")
				.expect("Refresh task should not panic.");

			assert!(matches!(
				outcome,
				Err(Error::Refresh(RefreshError::AuthenticatorFailure(_)))
			));
		}

		settle().await;

		assert_eq!(authenticator.calls(), 1);
		assert!(!coordinator.is_authenticated());
		assert_eq!(coordinator.state(), SessionState::Unauthenticated);
		assert!(coordinator.next_scheduled_refresh().is_none());
		assert!(storage.snapshot().is_none());
		assert_eq!(coordinator.metrics().failures(), 1);
	}

	#[tokio::test]
	async fn missing_refresh_token_fails_without_calling_the_authenticator() {
		let (coordinator, authenticator, _, clock) = build_test_coordinator(manual_config(), |a| a);

		coordinator
			.login(record_expiring("no-refresh", None, clock.now(), Duration::seconds(10)))
			.await;

		let err = coordinator.refresh().await.expect_err("Refresh needs a refresh token.");

		assert!(matches!(err, Error::Refresh(RefreshError::NoRefreshToken)));
		assert_eq!(authenticator.calls(), 0);
		assert!(!coordinator.is_authenticated());
	}

	#[tokio::test]
	async fn logout_fails_pending_waiters() {
		let (coordinator, authenticator, _, clock) =
			build_test_coordinator(manual_config(), |a| a.gated());

		coordinator
			.login(record_expiring("stale", Some("refresh-1"), clock.now(), Duration::seconds(10)))
			.await;

		let pending = {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.refresh().await })
		};

		settle().await;
		coordinator.logout().await;

		let outcome = tokio::time::timeout(StdDuration::from_secs(1), pending)
			.await
			.expect("Logout must release waiters.")
			.expect("Refresh task should not panic.");

		assert!(matches!(outcome, Err(Error::Refresh(RefreshError::SessionCleared))));

		// The in-flight call still runs to completion but cannot resurrect the session.
		authenticator.release(1);
		settle().await;

		assert!(!coordinator.is_authenticated());
		assert_eq!(authenticator.calls(), 1);
	}

	#[tokio::test]
	async fn rejected_token_reuses_a_newer_record() {
		let (coordinator, authenticator, _, clock) = build_test_coordinator(manual_config(), |a| a);

		coordinator
			.login(record_expiring("newer", Some("refresh-1"), clock.now(), Duration::hours(1)))
			.await;

		let stale = TokenSecret::new("older");
		let record = coordinator
			.refresh_rejected(Some(&stale))
			.await
			.expect("Newer record should be reused.");

		assert_eq!(record.access_token.expose(), "newer");
		assert_eq!(authenticator.calls(), 0);

		let current = TokenSecret::new("newer");
		let record = coordinator
			.refresh_rejected(Some(&current))
			.await
			.expect("Rejected current token should be refreshed.");

		assert_eq!(record.access_token.expose(), "access-1");
		assert_eq!(authenticator.calls(), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn proactive_timer_fires_threshold_before_expiry() {
		let (coordinator, authenticator, _, clock) =
			build_test_coordinator(SessionConfig::default(), |a| a.succeed_with("proactive"));
		let now = clock.now();

		coordinator
			.login(record_expiring("original", Some("refresh-1"), now, Duration::seconds(1_000)))
			.await;

		assert_eq!(coordinator.next_scheduled_refresh(), Some(now + Duration::seconds(700)));

		tokio::time::advance(StdDuration::from_secs(699)).await;
		settle().await;

		assert_eq!(authenticator.calls(), 0);

		tokio::time::advance(StdDuration::from_secs(1)).await;
		settle().await;

		assert_eq!(authenticator.calls(), 1);
		assert_eq!(
			coordinator.store().get().map(|record| record.access_token.expose().to_owned()),
			Some("proactive".into())
		);
		assert!(coordinator.next_scheduled_refresh().is_some(), "Renewal re-arms the timer.");
	}

	#[tokio::test(start_paused = true)]
	async fn short_lived_tokens_are_not_renewed_back_to_back() {
		let (coordinator, authenticator, _, clock) =
			build_test_coordinator(SessionConfig::default(), |a| a.with_lifetime(Duration::seconds(120)));
		let now = clock.now();

		coordinator
			.login(record_expiring("original", Some("refresh-1"), now, Duration::seconds(120)))
			.await;

		assert_eq!(coordinator.next_scheduled_refresh(), Some(now + Duration::seconds(90)));

		settle().await;

		assert_eq!(authenticator.calls(), 0, "A fresh short-lived token is not renewed at once.");

		tokio::time::advance(StdDuration::from_secs(90)).await;
		settle().await;

		assert_eq!(authenticator.calls(), 1);
		assert_eq!(
			coordinator.next_scheduled_refresh(),
			Some(now + Duration::seconds(90)),
			"The renewed 120 s token is re-armed 90 s out on the frozen clock."
		);

		tokio::time::advance(StdDuration::from_secs(60)).await;
		settle().await;

		assert_eq!(authenticator.calls(), 1, "Renewal must not re-fire before the new delay.");

		tokio::time::advance(StdDuration::from_secs(30)).await;
		settle().await;

		assert_eq!(authenticator.calls(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn logout_cancels_the_proactive_timer() {
		let (coordinator, authenticator, _, clock) =
			build_test_coordinator(SessionConfig::default(), |a| a);

		coordinator
			.login(record_expiring("original", Some("refresh-1"), clock.now(), Duration::seconds(1_000)))
			.await;

		assert!(coordinator.next_scheduled_refresh().is_some());

		coordinator.logout().await;

		assert!(coordinator.next_scheduled_refresh().is_none());

		tokio::time::advance(StdDuration::from_secs(2_000)).await;
		settle().await;

		assert_eq!(authenticator.calls(), 0);
	}

	#[tokio::test(start_paused = true)]
	async fn records_without_refresh_tokens_are_not_scheduled() {
		let (coordinator, _, _, clock) = build_test_coordinator(SessionConfig::default(), |a| a);

		coordinator
			.login(record_expiring("no-refresh", None, clock.now(), Duration::seconds(1_000)))
			.await;

		assert!(coordinator.next_scheduled_refresh().is_none());

		coordinator.schedule_proactive_refresh();

		assert!(coordinator.next_scheduled_refresh().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_scheduled_refresh_disarms_the_timer() {
		let (coordinator, authenticator, _, clock) =
			build_test_coordinator(SessionConfig::default(), |a| a);

		coordinator
			.login(record_expiring("original", Some("refresh-1"), clock.now(), Duration::seconds(400)))
			.await;
		coordinator.cancel_scheduled_refresh();

		assert!(coordinator.next_scheduled_refresh().is_none());

		tokio::time::advance(StdDuration::from_secs(200)).await;
		settle().await;

		assert_eq!(authenticator.calls(), 0);
		assert!(coordinator.is_authenticated());
	}
}
