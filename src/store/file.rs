//! File-backed [`TokenStorage`] that keeps one JSON snapshot on disk.

// std
use std::{
	fs::{self, File},
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::TokenRecord,
	store::{StoreError, StoreFuture, TokenStorage},
};

/// Persists the current record to a JSON file, replacing it atomically on every save.
///
/// Writes go to a sibling `.tmp` file that is synced and then renamed over the target, so
/// a crash never leaves a half-written snapshot behind. Saving `None` removes the file.
#[derive(Clone, Debug)]
pub struct FileStorage {
	path: PathBuf,
}
impl FileStorage {
	/// Uses `path` for the snapshot, creating its parent directory when missing.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		Ok(Self { path })
	}

	/// Location of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn read_snapshot(&self) -> Result<Option<TokenRecord>, StoreError> {
		let bytes = match fs::read(&self.path) {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
			Err(e) =>
				return Err(StoreError::Backend {
					message: format!("Failed to read {}: {e}", self.path.display()),
				}),
		};

		if bytes.is_empty() {
			return Ok(None);
		}

		serde_json::from_slice(&bytes).map(Some).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", self.path.display()),
		})
	}

	fn write_snapshot(&self, record: &TokenRecord) -> Result<(), StoreError> {
		Self::ensure_parent_exists(&self.path)?;

		let serialized =
			serde_json::to_vec_pretty(record).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize token record: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}

	fn remove_snapshot(&self) -> Result<(), StoreError> {
		match fs::remove_file(&self.path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StoreError::Backend {
				message: format!("Failed to remove {}: {e}", self.path.display()),
			}),
		}
	}
}
impl TokenStorage for FileStorage {
	fn load(&self) -> StoreFuture<'_, Option<TokenRecord>> {
		Box::pin(async move { self.read_snapshot() })
	}

	fn save(&self, record: Option<TokenRecord>) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			match record {
				Some(record) => self.write_snapshot(&record),
				None => self.remove_snapshot(),
			}
		})
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::_preludet::{fixture_instant, record_expiring};

	fn temp_path(label: &str) -> PathBuf {
		let unique = format!(
			"token_warden_{label}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	#[tokio::test]
	async fn save_and_reload_round_trip() {
		let path = temp_path("round_trip");
		let storage = FileStorage::open(&path).expect("Failed to open file storage.");
		let record = record_expiring("access", Some("refresh"), fixture_instant(), Duration::hours(1));

		storage.save(Some(record.clone())).await.expect("Failed to save fixture record.");
		drop(storage);

		let reopened = FileStorage::open(&path).expect("Failed to reopen file storage.");
		let loaded = reopened
			.load()
			.await
			.expect("Failed to load fixture record.")
			.expect("File storage lost the record after reopen.");

		assert_eq!(loaded, record);
		assert!(!path.with_extension("tmp").exists(), "Temporary file must be renamed away.");

		reopened.clear().await.expect("Failed to clear file storage.");

		assert!(!path.exists());
		assert!(reopened.load().await.expect("Missing files load as empty.").is_none());
	}

	#[tokio::test]
	async fn corrupt_snapshots_surface_serialization_errors() {
		let path = temp_path("corrupt");

		fs::write(&path, b"{not json").expect("Failed to write corrupt fixture.");

		let storage = FileStorage::open(&path).expect("Failed to open file storage.");
		let err = storage.load().await.expect_err("Corrupt snapshot should not load.");

		assert!(matches!(err, StoreError::Serialization { .. }));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary snapshot {}: {e}", path.display())
		});
	}
}
