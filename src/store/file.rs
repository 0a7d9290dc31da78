//! File-backed [`SchedulerStore`] keeping a JSON snapshot on disk.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	ledger::{ApiCallRecord, UsageAlert},
	limiter::RateLimitWindow,
	scheduler::{QueuedRequest, RequestId},
	store::{SchedulerStore, StoreError, StoreFuture, StoreSnapshot, StoreState},
};

/// Persists scheduler state to a JSON file after each mutation.
///
/// Writes go to a sibling `.tmp` file that is synced and then renamed over the snapshot, so a
/// crash leaves either the previous or the new snapshot on disk.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<StoreState>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		Self::ensure_parent_exists(&path)?;

		let state = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(state)) })
	}

	/// Location of the snapshot.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<StoreState, StoreError> {
		if !path.exists() {
			return Ok(StoreState::default());
		}

		let bytes = fs::read(path).map_err(|e| StoreError::Backend {
			message: format!("Failed to read {}: {e}", path.display()),
		})?;

		if bytes.is_empty() {
			return Ok(StoreState::default());
		}

		let snapshot: StoreSnapshot =
			serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
				message: format!("Failed to parse {}: {e}", path.display()),
			})?;

		Ok(snapshot.into())
	}

	fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
		if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
			fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
				message: format!("Failed to create store directory {}: {e}", parent.display()),
			})?;
		}

		Ok(())
	}

	fn persist_locked(&self, state: &StoreState) -> Result<(), StoreError> {
		let serialized = serde_json::to_vec_pretty(&StoreSnapshot::from(state)).map_err(|e| {
			StoreError::Serialization { message: format!("Failed to serialize store snapshot: {e}") }
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

	fn mutate(&self, f: impl FnOnce(&mut StoreState)) -> Result<(), StoreError> {
		let mut guard = self.inner.write();

		f(&mut guard);

		self.persist_locked(&guard)
	}

	fn prune_locked(&self, before: OffsetDateTime) -> Result<usize, StoreError> {
		let mut guard = self.inner.write();
		let removed = guard.prune(before);

		if removed > 0 {
			self.persist_locked(&guard)?;
		}

		Ok(removed)
	}
}
impl SchedulerStore for FileStore {
	fn save_request(&self, request: QueuedRequest) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|state| state.save_request(request)) })
	}

	fn load_requests(&self) -> StoreFuture<'_, Vec<QueuedRequest>> {
		Box::pin(async move { Ok(self.inner.read().requests()) })
	}

	fn load_id_watermark(&self) -> StoreFuture<'_, Option<RequestId>> {
		Box::pin(async move { Ok(self.inner.read().id_watermark()) })
	}

	fn save_windows(&self, windows: Vec<RateLimitWindow>) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|state| state.save_windows(windows)) })
	}

	fn load_windows(&self) -> StoreFuture<'_, Vec<RateLimitWindow>> {
		Box::pin(async move { Ok(self.inner.read().windows()) })
	}

	fn append_call(&self, record: ApiCallRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|state| state.append_call(record)) })
	}

	fn load_calls(&self) -> StoreFuture<'_, Vec<ApiCallRecord>> {
		Box::pin(async move { Ok(self.inner.read().calls()) })
	}

	fn save_alert(&self, alert: UsageAlert) -> StoreFuture<'_, ()> {
		Box::pin(async move { self.mutate(|state| state.save_alert(alert)) })
	}

	fn load_alerts(&self) -> StoreFuture<'_, Vec<UsageAlert>> {
		Box::pin(async move { Ok(self.inner.read().alerts()) })
	}

	fn prune(&self, before: OffsetDateTime) -> StoreFuture<'_, usize> {
		Box::pin(async move { self.prune_locked(before) })
	}
}
