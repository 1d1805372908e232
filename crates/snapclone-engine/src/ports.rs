//! External collaborators, modeled as traits. Concrete
//! implementations — a real volume-service RPC client, an S3-backed
//! snapshot store, a durable task store — are out of scope for this
//! crate; `memory` ships in-memory reference implementations used by
//! tests and suitable as a starting point for a real backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use snapclone_core::TaskId;

// ── Volume client ─────────────────────────────────────────────────────────────

/// File metadata as returned by the volume service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: u64,
    pub owner: String,
    pub length: u64,
    pub seqnum: u64,
    pub chunk_size: u32,
    pub segment_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIdInfo {
    pub logical_pool_id: u32,
    pub copyset_id: u32,
    pub chunk_id: u64,
}

/// A segment's allocated chunks, in chunk-index order within the segment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub chunks: Vec<ChunkIdInfo>,
}

/// Failure modes a volume-client call can report. `NotExist` and
/// `AuthFail` are meaningful outcomes the engine branches on; anything
/// else collapses to `Other` and becomes `ErrorCode::InternalError` at
/// the boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VolumeError {
    #[error("file does not exist")]
    NotExist,
    #[error("auth failure")]
    AuthFail,
    #[error("volume client error: {0}")]
    Other(String),
}

/// The volume service: namespace, segment allocation, rename, chunk
/// recovery. "Create" operations are idempotent from the caller's
/// perspective — an implementation must treat "already exists" as
/// success and return the existing object, never `VolumeError`, so the
/// engine's restart-from-crash handling holds without special casing at
/// every call site.
#[async_trait]
pub trait VolumeClient: Send + Sync {
    async fn get_file_info(&self, name: &str, user: &str) -> Result<FileInfo, VolumeError>;

    async fn create_clone_file(
        &self,
        name: &str,
        user: &str,
        length: u64,
        seqnum: u64,
        chunk_size: u32,
    ) -> Result<FileInfo, VolumeError>;

    /// `None` means "no chunks allocated at this offset" (NotAllocate),
    /// which is a normal outcome, not an error — it only arises when
    /// `allocate_if_missing` is false.
    async fn get_or_allocate_segment_info(
        &self,
        allocate_if_missing: bool,
        offset: u64,
        file: &FileInfo,
        user: &str,
    ) -> Result<Option<SegmentInfo>, VolumeError>;

    async fn create_clone_chunk(
        &self,
        location: &str,
        chunk_id_info: ChunkIdInfo,
        seq_num: u64,
        correct_sn: u64,
        chunk_size: u32,
    ) -> Result<(), VolumeError>;

    async fn complete_clone_meta(&self, name: &str, user: &str) -> Result<(), VolumeError>;

    async fn recover_chunk(
        &self,
        chunk_id_info: ChunkIdInfo,
        offset: u64,
        length: u64,
    ) -> Result<(), VolumeError>;

    async fn rename_clone_file(
        &self,
        user: &str,
        origin_id: u64,
        dest_id: u64,
        origin: &str,
        destination: &str,
    ) -> Result<(), VolumeError>;

    async fn complete_clone_file(&self, name: &str, user: &str) -> Result<(), VolumeError>;

    /// `NotExist` is treated as success by callers: deleting the temp
    /// file or destination during cleanup may race a prior crashed
    /// cleanup attempt that already removed it.
    async fn delete_file(&self, name: &str, user: &str, file_id: u64) -> Result<(), VolumeError>;
}

// ── Snapshot metadata / data stores ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotStatus {
    Pending,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    pub file_name: String,
    pub seq_num: u64,
    pub chunk_size: u32,
    pub segment_size: u64,
    pub file_length: u64,
    pub user: String,
    pub status: SnapshotStatus,
}

#[async_trait]
pub trait SnapshotMetaStore: Send + Sync {
    /// `None` is a miss — the source id isn't a known snapshot at all
    /// (admission then tries it as a live-file source instead).
    async fn get_snapshot_info(&self, source_id: &str) -> Option<SnapshotInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkIndexEntry {
    pub chunk_seq_num: u64,
}

/// `chunkIndex → (s3 key, chunk_seq_num)` for one snapshot's data.
pub type ChunkIndexData = HashMap<u64, (String, ChunkIndexEntry)>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("snapshot data store error: {0}")]
pub struct SnapshotDataError(pub String);

#[async_trait]
pub trait SnapshotDataStore: Send + Sync {
    async fn get_chunk_index_data(
        &self,
        file_name: &str,
        seq_num: u64,
    ) -> Result<ChunkIndexData, SnapshotDataError>;
}

// ── Task metadata store ───────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("no task with id {0}")]
    NotFound(TaskId),
    #[error("task store error: {0}")]
    Other(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn add_clone_info(&self, info: snapclone_core::CloneInfo) -> Result<(), StoreError>;
    async fn update_clone_info(&self, info: &snapclone_core::CloneInfo)
        -> Result<(), StoreError>;
    async fn get_clone_info(&self, id: &TaskId) -> Result<snapclone_core::CloneInfo, StoreError>;
    async fn get_clone_info_list(&self) -> Result<Vec<snapclone_core::CloneInfo>, StoreError>;
    async fn delete_clone_info(&self, id: &TaskId) -> Result<(), StoreError>;
}

// ── Identifier generation ──────────────────────────────────────────────────────

/// Task id minting is an external concern: the engine never invents
/// ids itself, it asks this collaborator for one.
pub trait IdGenerator: Send + Sync {
    fn new_task_id(&self) -> TaskId;
}
