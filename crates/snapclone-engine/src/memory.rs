//! In-memory reference implementations of every port trait. Not meant
//! for production (no real volume backend, no persistence) — they
//! exist so the engine and its tests have a port implementation that
//! needs nothing external, the same role the teacher's `ComputeStore`
//! plays for `summit-services`.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use snapclone_core::{CloneInfo, TaskId};

use crate::ports::{
    ChunkIdInfo, ChunkIndexData, FileInfo, IdGenerator, SegmentInfo, SnapshotDataError,
    SnapshotDataStore, SnapshotInfo, SnapshotMetaStore, StoreError, TaskStore, VolumeClient,
    VolumeError,
};

/// Mints task ids as `task-<n>`, monotonically, matching the
/// teacher's blake3-hash-of-counter-ish style in spirit but kept
/// trivially inspectable for tests.
#[derive(Default)]
pub struct CountingIdGenerator {
    next: AtomicU64,
}

impl IdGenerator for CountingIdGenerator {
    fn new_task_id(&self) -> TaskId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        TaskId(format!("task-{n}"))
    }
}

/// A named volume: file metadata plus a sparse segment→chunk table.
#[derive(Debug, Clone)]
struct Volume {
    info: FileInfo,
    segments: HashMap<u64, SegmentInfo>,
}

/// Entirely in-process volume service. Segment allocation mints fresh
/// `ChunkIdInfo`s on first touch and remembers them, so repeated
/// `allocate_if_missing` calls for the same offset are idempotent —
/// required for the executor's restart-safety story.
pub struct InMemoryVolumeClient {
    volumes: DashMap<String, Volume>,
    next_file_id: AtomicU64,
    next_chunk_id: AtomicU64,
}

impl Default for InMemoryVolumeClient {
    fn default() -> Self {
        Self {
            volumes: DashMap::new(),
            next_file_id: AtomicU64::new(1),
            next_chunk_id: AtomicU64::new(1),
        }
    }
}

impl InMemoryVolumeClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a pre-existing volume, e.g. a recover destination or a
    /// file-type clone source, the way a test fixture would.
    pub fn seed(&self, name: &str, info: FileInfo) {
        self.volumes.insert(
            name.to_string(),
            Volume {
                info,
                segments: HashMap::new(),
            },
        );
    }

    pub fn exists(&self, name: &str) -> bool {
        self.volumes.contains_key(name)
    }
}

#[async_trait]
impl VolumeClient for InMemoryVolumeClient {
    async fn get_file_info(&self, name: &str, _user: &str) -> Result<FileInfo, VolumeError> {
        self.volumes
            .get(name)
            .map(|v| v.info.clone())
            .ok_or(VolumeError::NotExist)
    }

    async fn create_clone_file(
        &self,
        name: &str,
        owner: &str,
        length: u64,
        seqnum: u64,
        chunk_size: u32,
    ) -> Result<FileInfo, VolumeError> {
        if let Some(existing) = self.volumes.get(name) {
            return Ok(existing.info.clone());
        }
        let id = self.next_file_id.fetch_add(1, Ordering::Relaxed);
        let info = FileInfo {
            id,
            owner: owner.to_string(),
            length,
            seqnum,
            chunk_size,
            segment_size: (chunk_size as u64) * 128,
        };
        self.volumes.insert(
            name.to_string(),
            Volume {
                info: info.clone(),
                segments: HashMap::new(),
            },
        );
        Ok(info)
    }

    async fn get_or_allocate_segment_info(
        &self,
        allocate_if_missing: bool,
        offset: u64,
        file: &FileInfo,
        _user: &str,
    ) -> Result<Option<SegmentInfo>, VolumeError> {
        let mut volume = self
            .volumes
            .iter_mut()
            .find(|v| v.info.id == file.id)
            .ok_or(VolumeError::NotExist)?;
        if let Some(segment) = volume.segments.get(&offset) {
            return Ok(Some(segment.clone()));
        }
        if !allocate_if_missing {
            return Ok(None);
        }
        let chunks_per_segment = (volume.info.segment_size / volume.info.chunk_size as u64).max(1);
        let chunks = (0..chunks_per_segment)
            .map(|_| ChunkIdInfo {
                logical_pool_id: 1,
                copyset_id: 1,
                chunk_id: self.next_chunk_id.fetch_add(1, Ordering::Relaxed),
            })
            .collect();
        let segment = SegmentInfo { chunks };
        volume.segments.insert(offset, segment.clone());
        Ok(Some(segment))
    }

    async fn create_clone_chunk(
        &self,
        _location: &str,
        _chunk_id_info: ChunkIdInfo,
        _seq_num: u64,
        _correct_sn: u64,
        _chunk_size: u32,
    ) -> Result<(), VolumeError> {
        Ok(())
    }

    async fn complete_clone_meta(&self, name: &str, _user: &str) -> Result<(), VolumeError> {
        if self.volumes.contains_key(name) {
            Ok(())
        } else {
            Err(VolumeError::NotExist)
        }
    }

    async fn recover_chunk(
        &self,
        _chunk_id_info: ChunkIdInfo,
        _offset: u64,
        _length: u64,
    ) -> Result<(), VolumeError> {
        Ok(())
    }

    async fn rename_clone_file(
        &self,
        _user: &str,
        _origin_id: u64,
        _dest_id: u64,
        origin: &str,
        destination: &str,
    ) -> Result<(), VolumeError> {
        let (_, volume) = self
            .volumes
            .remove(origin)
            .ok_or(VolumeError::NotExist)?;
        self.volumes.insert(destination.to_string(), volume);
        Ok(())
    }

    async fn complete_clone_file(&self, name: &str, _user: &str) -> Result<(), VolumeError> {
        if self.volumes.contains_key(name) {
            Ok(())
        } else {
            Err(VolumeError::NotExist)
        }
    }

    async fn delete_file(&self, name: &str, _user: &str, _file_id: u64) -> Result<(), VolumeError> {
        match self.volumes.remove(name) {
            Some(_) => Ok(()),
            None => Err(VolumeError::NotExist),
        }
    }
}

/// In-memory snapshot catalog.
#[derive(Default)]
pub struct InMemorySnapshotMetaStore {
    snapshots: DashMap<String, SnapshotInfo>,
}

impl InMemorySnapshotMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, id: &str, info: SnapshotInfo) {
        self.snapshots.insert(id.to_string(), info);
    }
}

#[async_trait]
impl SnapshotMetaStore for InMemorySnapshotMetaStore {
    async fn get_snapshot_info(&self, source_id: &str) -> Option<SnapshotInfo> {
        self.snapshots.get(source_id).map(|v| v.clone())
    }
}

/// In-memory snapshot chunk index. A snapshot with no seeded data
/// behaves like a fully-sparse snapshot (no chunks to copy).
#[derive(Default)]
pub struct InMemorySnapshotDataStore {
    data: DashMap<(String, u64), ChunkIndexData>,
}

impl InMemorySnapshotDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, file_name: &str, seq_num: u64, data: ChunkIndexData) {
        self.data.insert((file_name.to_string(), seq_num), data);
    }
}

#[async_trait]
impl SnapshotDataStore for InMemorySnapshotDataStore {
    async fn get_chunk_index_data(
        &self,
        file_name: &str,
        seq_num: u64,
    ) -> Result<ChunkIndexData, SnapshotDataError> {
        Ok(self
            .data
            .get(&(file_name.to_string(), seq_num))
            .map(|v| v.clone())
            .unwrap_or_default())
    }
}

/// In-memory task metadata store, modeled directly on the teacher's
/// `ComputeStore` (a `DashMap` keyed by id, cloning in and out).
#[derive(Default)]
pub struct InMemoryTaskStore {
    tasks: DashMap<TaskId, CloneInfo>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn add_clone_info(&self, info: CloneInfo) -> Result<(), StoreError> {
        self.tasks.insert(info.task_id.clone(), info);
        Ok(())
    }

    async fn update_clone_info(&self, info: &CloneInfo) -> Result<(), StoreError> {
        if !self.tasks.contains_key(&info.task_id) {
            return Err(StoreError::NotFound(info.task_id.clone()));
        }
        self.tasks.insert(info.task_id.clone(), info.clone());
        Ok(())
    }

    async fn get_clone_info(&self, id: &TaskId) -> Result<CloneInfo, StoreError> {
        self.tasks
            .get(id)
            .map(|v| v.clone())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    async fn get_clone_info_list(&self) -> Result<Vec<CloneInfo>, StoreError> {
        Ok(self.tasks.iter().map(|v| v.clone()).collect())
    }

    async fn delete_clone_info(&self, id: &TaskId) -> Result<(), StoreError> {
        self.tasks
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }
}

/// Bundle of all five in-memory ports plus the `Engine` wired to them,
/// for tests that want direct handles to seed volumes/snapshots and
/// still exercise the real engine on top.
pub struct TestHarness {
    pub engine: crate::engine::Engine,
    pub volume: Arc<InMemoryVolumeClient>,
    pub snapshot_meta: Arc<InMemorySnapshotMetaStore>,
    pub snapshot_data: Arc<InMemorySnapshotDataStore>,
    pub tasks: Arc<InMemoryTaskStore>,
}

pub fn test_engine(config: snapclone_core::SnapcloneConfig) -> TestHarness {
    let volume = Arc::new(InMemoryVolumeClient::new());
    let snapshot_meta = Arc::new(InMemorySnapshotMetaStore::new());
    let snapshot_data = Arc::new(InMemorySnapshotDataStore::new());
    let tasks = Arc::new(InMemoryTaskStore::new());
    let engine = crate::engine::Engine::new(
        volume.clone(),
        snapshot_meta.clone(),
        snapshot_data.clone(),
        tasks.clone(),
        Arc::new(CountingIdGenerator::default()),
        config,
    );
    TestHarness {
        engine,
        volume,
        snapshot_meta,
        snapshot_data,
        tasks,
    }
}
