//! One-shot proactive refresh timer owned by the coordinator state.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{
	runtime::Handle,
	task::JoinHandle,
	time::{self as tokio_time, Instant},
};
// self
use crate::{
	_prelude::*,
	coordinator::{Core, RefreshTrigger},
};

/// Armed timer that starts a refresh when it fires.
///
/// Dropping the value aborts the timer, so replacing or clearing the slot in the
/// coordinator state is all it takes to cancel it. The task only holds a weak reference to
/// the coordinator core and never keeps a session alive on its own.
pub(crate) struct ScheduledRefresh {
	handle: JoinHandle<()>,
	fires_at: OffsetDateTime,
}
impl ScheduledRefresh {
	/// Arms a timer on the current Tokio runtime; returns `None` outside a runtime.
	pub(crate) fn arm(core: Weak<Core>, delay: StdDuration, fires_at: OffsetDateTime) -> Option<Self> {
		let runtime = match Handle::try_current() {
			Ok(runtime) => runtime,
			Err(_) => {
				tracing::warn!(
					%fires_at,
					"no Tokio runtime available; proactive refresh was not scheduled"
				);

				return None;
			},
		};
		// The countdown starts at arming, not at the task's first poll.
		let Some(deadline) = Instant::now().checked_add(delay) else {
			tracing::warn!(%fires_at, "proactive refresh is too far out to schedule");

			return None;
		};
		let handle = runtime.spawn(async move {
			tokio_time::sleep_until(deadline).await;

			if let Some(core) = core.upgrade() {
				tracing::debug!("proactive refresh timer fired");

				core.start_background_refresh(RefreshTrigger::Proactive);
			}
		});

		Some(Self { handle, fires_at })
	}

	/// Instant the timer was computed to fire at.
	pub(crate) fn fires_at(&self) -> OffsetDateTime {
		self.fires_at
	}
}
impl Drop for ScheduledRefresh {
	fn drop(&mut self) {
		self.handle.abort();
	}
}
impl Debug for ScheduledRefresh {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ScheduledRefresh").field("fires_at", &self.fires_at).finish()
	}
}

/// Share of a short lifetime that may elapse before a proactive refresh.
const SHORT_LIVED_FRESHNESS: f64 = 0.75;

/// Delay before a proactive refresh, measured from `now`.
///
/// Normally `remaining - threshold`. A token issued with a lifetime at or below the
/// threshold is renewed after [`SHORT_LIVED_FRESHNESS`] of what remains instead, so renewals
/// of short-lived tokens never re-arm at zero. Expired tokens fire at once.
pub(crate) fn proactive_delay(
	expires_at: OffsetDateTime,
	now: OffsetDateTime,
	threshold: Duration,
) -> Duration {
	let remaining = expires_at - now;

	if !remaining.is_positive() {
		return Duration::ZERO;
	}

	match remaining.checked_sub(threshold) {
		Some(lead) if lead.is_positive() => lead,
		_ => remaining * SHORT_LIVED_FRESHNESS,
	}
}
