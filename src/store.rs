//! Token store and the persistence contract behind it.
//!
//! [`TokenStore`] is the in-memory holder of the single current [`TokenRecord`]. It shares
//! its state with the [`RefreshCoordinator`](crate::coordinator::RefreshCoordinator) it was
//! obtained from, so `set` also reschedules the proactive timer and releases waiters of a
//! cleared session. Every change is written through a [`TokenStorage`] backend; the
//! in-memory state stays authoritative when a write fails.

pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

// self
use crate::{_prelude::*, auth::TokenRecord, coordinator::Core};

/// Boxed future returned by [`TokenStorage`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence backend for the current token record.
pub trait TokenStorage
where
	Self: 'static + Send + Sync,
{
	/// Loads the persisted record, if any.
	fn load(&self) -> StoreFuture<'_, Option<TokenRecord>>;

	/// Replaces the persisted record; `None` removes it.
	fn save(&self, record: Option<TokenRecord>) -> StoreFuture<'_, ()>;

	/// Removes the persisted record.
	fn clear(&self) -> StoreFuture<'_, ()> {
		self.save(None)
	}
}

/// Error type produced by [`TokenStorage`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Handle to the current token record of a session.
///
/// Obtained through [`RefreshCoordinator::store`](crate::coordinator::RefreshCoordinator::store);
/// clones share the same state.
#[derive(Clone)]
pub struct TokenStore {
	core: Arc<Core>,
}
impl TokenStore {
	pub(crate) fn new(core: Arc<Core>) -> Self {
		Self { core }
	}

	/// Replaces the current record and persists the change.
	///
	/// Installing a record re-arms the proactive timer; `None` cancels it and fails every
	/// caller waiting on a refresh with [`RefreshError::SessionCleared`](crate::error::RefreshError::SessionCleared).
	pub async fn set(&self, record: Option<TokenRecord>) {
		{
			let mut state = self.core.state.lock();

			self.core.replace_locked(&mut state, record.map(Arc::new));
		}

		self.core.persist().await;
	}

	/// Returns the current record without waiting.
	pub fn get(&self) -> Option<Arc<TokenRecord>> {
		self.core.state.lock().current.clone()
	}

	/// Returns `true` when no record is held or it expired at `now`.
	pub fn is_expired(&self, now: OffsetDateTime) -> bool {
		self.get().is_none_or(|record| record.is_expired_at(now))
	}

	/// Returns `true` when a record is held and expires within the configured threshold.
	pub fn is_expiring_soon(&self, now: OffsetDateTime) -> bool {
		self.is_expiring_soon_within(now, self.core.config.refresh_threshold())
	}

	/// Like [`is_expiring_soon`](Self::is_expiring_soon) with an explicit threshold.
	pub fn is_expiring_soon_within(&self, now: OffsetDateTime, threshold: Duration) -> bool {
		self.get().is_some_and(|record| record.is_expiring_soon_at(now, threshold))
	}

	/// Installs the persisted record, if any, without writing it back.
	///
	/// Load failures are logged and leave the store untouched. Returns the installed record.
	pub async fn restore(&self) -> Option<Arc<TokenRecord>> {
		let record = Arc::new(self.core.load().await?);
		let mut state = self.core.state.lock();

		tracing::debug!(expires_at = %record.expires_at, "restored persisted token record");
		self.core.replace_locked(&mut state, Some(record.clone()));

		Some(record)
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore").field("current", &self.get()).finish()
	}
}
