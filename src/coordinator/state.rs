//! Mutable coordinator state and the session state machine derived from it.

// std
use std::collections::VecDeque;
// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenStatus},
	coordinator::{RefreshOutcome, schedule::ScheduledRefresh},
	error::RefreshError,
};

/// Observable position of a session in its token lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
	/// No token is held; the host must log in.
	Unauthenticated,
	/// A token is held and outside the refresh threshold.
	Valid,
	/// A token is held but within the refresh threshold.
	ExpiringSoon,
	/// The held token reached its expiry instant.
	Expired,
	/// A refresh cycle is in flight.
	Refreshing,
}
impl SessionState {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			SessionState::Unauthenticated => "unauthenticated",
			SessionState::Valid => "valid",
			SessionState::ExpiringSoon => "expiring_soon",
			SessionState::Expired => "expired",
			SessionState::Refreshing => "refreshing",
		}
	}
}
impl Display for SessionState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Everything the coordinator and token store mutate, guarded by a single mutex.
///
/// The lock is never held across an `.await`; callers copy what they need out of it.
#[derive(Default)]
pub(crate) struct CoordinatorState {
	pub(crate) current: Option<Arc<TokenRecord>>,
	pub(crate) refreshing: bool,
	pub(crate) waiters: VecDeque<oneshot::Sender<RefreshOutcome>>,
	pub(crate) timer: Option<ScheduledRefresh>,
	/// Bumped whenever `current` is replaced, so a completing refresh can tell whether
	/// the record it renewed is still the one installed.
	pub(crate) generation: u64,
}
impl CoordinatorState {
	pub(crate) fn session_state(&self, now: OffsetDateTime, threshold: Duration) -> SessionState {
		let Some(current) = self.current.as_ref() else {
			return SessionState::Unauthenticated;
		};

		if self.refreshing {
			return SessionState::Refreshing;
		}

		match current.status_at(now, threshold) {
			TokenStatus::Active => SessionState::Valid,
			TokenStatus::ExpiringSoon => SessionState::ExpiringSoon,
			TokenStatus::Expired => SessionState::Expired,
		}
	}

	/// Resolves every queued waiter with `outcome`; each waiter is released exactly once.
	pub(crate) fn release_waiters(&mut self, outcome: &RefreshOutcome) -> usize {
		let mut released = 0;

		for waiter in self.waiters.drain(..) {
			// A dropped receiver means the caller stopped waiting; nothing to deliver.
			let _ = waiter.send(outcome.clone());

			released += 1;
		}

		released
	}

	pub(crate) fn fail_waiters(&mut self, error: RefreshError) -> usize {
		self.release_waiters(&Err(error))
	}
}
impl Debug for CoordinatorState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CoordinatorState")
			.field("current", &self.current)
			.field("refreshing", &self.refreshing)
			.field("waiters", &self.waiters.len())
			.field("timer", &self.timer)
			.field("generation", &self.generation)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{fixture_instant, record_expiring};

	#[test]
	fn session_state_tracks_the_lifecycle() {
		let now = fixture_instant();
		let threshold = Duration::seconds(300);
		let mut state = CoordinatorState::default();

		assert_eq!(state.session_state(now, threshold), SessionState::Unauthenticated);

		state.current =
			Some(Arc::new(record_expiring("a", Some("r"), now, Duration::seconds(1_000))));

		assert_eq!(state.session_state(now, threshold), SessionState::Valid);
		assert_eq!(
			state.session_state(now + Duration::seconds(750), threshold),
			SessionState::ExpiringSoon
		);
		assert_eq!(
			state.session_state(now + Duration::seconds(1_000), threshold),
			SessionState::Expired
		);

		state.refreshing = true;

		assert_eq!(state.session_state(now, threshold), SessionState::Refreshing);
	}

	#[tokio::test]
	async fn waiters_are_released_exactly_once() {
		let mut state = CoordinatorState::default();
		let (first_tx, first_rx) = oneshot::channel();
		let (second_tx, second_rx) = oneshot::channel();

		state.waiters.push_back(first_tx);
		state.waiters.push_back(second_tx);

		assert_eq!(state.fail_waiters(RefreshError::SessionCleared), 2);
		assert_eq!(state.fail_waiters(RefreshError::SessionCleared), 0);

		for rx in [first_rx, second_rx] {
			let outcome = rx.await.expect("Waiter should receive an outcome.");

			assert!(matches!(outcome, Err(RefreshError::SessionCleared)));
		}
	}
}
