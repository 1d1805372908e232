//! Ties the ports together into the four public operations.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use snapclone_core::{ErrorCode, SnapcloneConfig, TaskId};

use crate::ports::{IdGenerator, SnapshotDataError, SnapshotDataStore, SnapshotMetaStore, StoreError, TaskStore, VolumeClient, VolumeError};
use crate::ref_counter::SnapshotRefCounter;

/// Error surfaced by every engine operation. Carries a stable
/// `ErrorCode` for the boundary plus a human-readable cause; store
/// errors forward their own code unwrapped instead of collapsing to
/// `InternalError`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{code}: {message}")]
    Code {
        code: ErrorCode,
        message: String,
    },
    #[error("task store error: {0}")]
    Store(#[from] StoreError),
    #[error("volume client error: {0}")]
    Volume(#[from] VolumeError),
    #[error("snapshot data store error: {0}")]
    Data(#[from] SnapshotDataError),
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        EngineError::Code {
            code,
            message: message.into(),
        }
    }

    /// Best-effort mapping to a stable boundary code. Store errors
    /// don't carry one of our `ErrorCode`s, so they surface as
    /// `InternalError` here, while the underlying message is still
    /// available via `Display`/`source`.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            EngineError::Code { code, .. } => *code,
            EngineError::Store(_) => ErrorCode::InternalError,
            EngineError::Volume(VolumeError::NotExist) => ErrorCode::FileNotExist,
            EngineError::Volume(VolumeError::AuthFail) => ErrorCode::InvalidUser,
            EngineError::Volume(VolumeError::Other(_)) => ErrorCode::InternalError,
            EngineError::Data(_) => ErrorCode::InternalError,
        }
    }
}

/// Per-task serialization: two callers racing to finalize the same
/// task (e.g. a step retry overlapping a cleanup admission check) take
/// this lock before touching the task's store record.
#[derive(Clone, Default)]
pub struct TaskLocks {
    locks: Arc<DashMap<TaskId, Arc<Mutex<()>>>>,
}

impl TaskLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, id: &TaskId) -> TaskGuard {
        let mutex = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        TaskGuard { _guard: guard }
    }

    /// Drop the lock entry once a task is deleted, so finished tasks
    /// don't leak entries in the map forever.
    pub fn forget(&self, id: &TaskId) {
        self.locks.remove(id);
    }
}

pub struct TaskGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

/// The engine: holds the external collaborators and the handful of
/// pieces of shared in-process state (ref counts, per-task locks) that
/// are genuinely internal to this crate rather than delegated out.
#[derive(Clone)]
pub struct Engine {
    pub(crate) volume: Arc<dyn VolumeClient>,
    pub(crate) snapshot_meta: Arc<dyn SnapshotMetaStore>,
    pub(crate) snapshot_data: Arc<dyn SnapshotDataStore>,
    pub(crate) tasks: Arc<dyn TaskStore>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) ref_counts: SnapshotRefCounter,
    pub(crate) task_locks: TaskLocks,
    pub(crate) config: SnapcloneConfig,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        volume: Arc<dyn VolumeClient>,
        snapshot_meta: Arc<dyn SnapshotMetaStore>,
        snapshot_data: Arc<dyn SnapshotDataStore>,
        tasks: Arc<dyn TaskStore>,
        ids: Arc<dyn IdGenerator>,
        config: SnapcloneConfig,
    ) -> Self {
        Self {
            volume,
            snapshot_meta,
            snapshot_data,
            tasks,
            ids,
            ref_counts: SnapshotRefCounter::new(),
            task_locks: TaskLocks::new(),
            config,
        }
    }

    pub fn config(&self) -> &SnapcloneConfig {
        &self.config
    }

    /// Read-only access to snapshot reference counts, for callers that
    /// need to confirm a snapshot is free to delete.
    pub fn ref_counts(&self) -> &SnapshotRefCounter {
        &self.ref_counts
    }

    /// Looks up one task's durable record. A thin proxy over the
    /// injected `TaskStore`, exposed here so a front-end never needs its
    /// own handle to the store to answer "what's the status of task X".
    pub async fn get_clone_info(
        &self,
        task_id: &TaskId,
    ) -> Result<snapclone_core::CloneInfo, EngineError> {
        Ok(self.tasks.get_clone_info(task_id).await?)
    }

    /// Every task currently known to the store, `Error` and `Done`
    /// included. Used by admission's destination conflict scan and
    /// equally useful to a front-end listing in-flight and completed
    /// tasks.
    pub async fn get_clone_info_list(&self) -> Result<Vec<snapclone_core::CloneInfo>, EngineError> {
        Ok(self.tasks.get_clone_info_list().await?)
    }
}
