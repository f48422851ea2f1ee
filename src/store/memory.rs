//! Thread-safe in-memory [`TokenStorage`] implementation for local development and tests.

// std
use std::sync::atomic::{AtomicUsize, Ordering};
// crates.io
use parking_lot::RwLock;
// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	store::{StoreFuture, TokenStorage},
};

/// Storage backend that keeps the snapshot in-process; the default for new coordinators.
#[derive(Debug, Default)]
pub struct MemoryStorage {
	record: RwLock<Option<TokenRecord>>,
	writes: AtomicUsize,
}
impl MemoryStorage {
	/// Creates storage pre-populated with `record`, as if persisted by an earlier process.
	pub fn with_record(record: TokenRecord) -> Self {
		Self { record: RwLock::new(Some(record)), writes: AtomicUsize::new(0) }
	}

	/// Returns a copy of the stored record.
	pub fn snapshot(&self) -> Option<TokenRecord> {
		self.record.read().clone()
	}

	/// Number of `save` calls received so far.
	pub fn writes(&self) -> usize {
		self.writes.load(Ordering::SeqCst)
	}
}
impl TokenStorage for MemoryStorage {
	fn load(&self) -> StoreFuture<'_, Option<TokenRecord>> {
		let record = self.snapshot();

		Box::pin(async move { Ok(record) })
	}

	fn save(&self, record: Option<TokenRecord>) -> StoreFuture<'_, ()> {
		*self.record.write() = record;
		self.writes.fetch_add(1, Ordering::SeqCst);

		Box::pin(async { Ok(()) })
	}
}
