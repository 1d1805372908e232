//! The durable task record and the step model that orders its execution.

use serde::{Deserialize, Serialize};

/// Opaque task identifier. Minted by an injected generator — see
/// `snapclone_engine::ports::IdGenerator` — never by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a request creates a new volume or overwrites an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Clone,
    Recover,
}

/// Classification of the source a clone/recover reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Snapshot,
    File,
}

/// Lifecycle status of a clone/recover task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Cloning,
    Done,
    Error,
    Cleaning,
}

/// Step in the per-task state machine. Order matters: `PartialOrd`/`Ord`
/// reflect the canonical sequence position, not the enum's declaration
/// order, so a persisted `next_step` can be compared against the step
/// that just ran with plain `step > previous`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloneStep {
    CreateCloneFile,
    CreateCloneMeta,
    CreateCloneChunk,
    CompleteCloneMeta,
    // RecoverChunk and RenameCloneFile swap relative order between the
    // lazy and eager variants; `rank` below resolves that, `Ord` itself
    // picks a fixed total order only good for asserting strict
    // monotonicity within one task's run.
    RecoverChunk,
    RenameCloneFile,
    CompleteCloneFile,
    End,
}

impl CloneStep {
    /// Position in the sequence actually taken by a task, used to check
    /// that a persisted `next_step` is strictly greater than the step
    /// that just ran. Lazy tasks run RenameCloneFile before RecoverChunk;
    /// eager tasks run the reverse, so rank is parameterized on `lazy`.
    pub fn rank(self, lazy: bool) -> u8 {
        use CloneStep::*;
        match (self, lazy) {
            (CreateCloneFile, _) => 0,
            (CreateCloneMeta, _) => 1,
            (CreateCloneChunk, _) => 2,
            (CompleteCloneMeta, _) => 3,
            // Lazy: rename, then recover data into the renamed file,
            // then complete it. Eager: recover data into the temp
            // file, complete it, then rename last.
            (RenameCloneFile, true) => 4,
            (RecoverChunk, true) => 5,
            (CompleteCloneFile, true) => 6,
            (RecoverChunk, false) => 4,
            (CompleteCloneFile, false) => 5,
            (RenameCloneFile, false) => 6,
            (End, _) => 7,
        }
    }

    /// The step that follows `self` for a task with the given laziness.
    /// `CompleteCloneMeta` and `RenameCloneFile`/`CompleteCloneFile`
    /// branch on `lazy`; every other step has one successor regardless.
    pub fn next(self, lazy: bool) -> CloneStep {
        use CloneStep::*;
        match self {
            CreateCloneFile => CreateCloneMeta,
            CreateCloneMeta => CreateCloneChunk,
            CreateCloneChunk => CompleteCloneMeta,
            CompleteCloneMeta => {
                if lazy {
                    RenameCloneFile
                } else {
                    RecoverChunk
                }
            }
            RecoverChunk => CompleteCloneFile,
            RenameCloneFile => {
                if lazy {
                    RecoverChunk
                } else {
                    End
                }
            }
            CompleteCloneFile => {
                if lazy {
                    End
                } else {
                    RenameCloneFile
                }
            }
            End => End,
        }
    }

    /// True once the temporary clone file is known to exist, i.e. the
    /// meta-refresh pass must run before the step loop. False only at
    /// the two steps before the temp file has metadata, and at `End`.
    pub fn needs_meta_refresh(self) -> bool {
        !matches!(
            self,
            CloneStep::CreateCloneFile | CloneStep::CreateCloneMeta | CloneStep::End
        )
    }
}

/// Progress milestones. `RecoverChunk` interpolates between
/// `RECOVER_CHUNK_BEGIN` and `RECOVER_CHUNK_END` across segments.
pub mod progress {
    pub const CREATE_CLONE_FILE: u8 = 10;
    pub const CREATE_CLONE_META: u8 = 20;
    pub const CREATE_CLONE_CHUNK: u8 = 50;
    pub const RECOVER_CHUNK_BEGIN: u8 = CREATE_CLONE_CHUNK;
    pub const RECOVER_CHUNK_END: u8 = 90;
    pub const COMPLETE: u8 = 100;
}

/// The durable task record. Mutated only by the step executor and
/// the cleanup executor; created by admission; deleted only by a
/// successful cleanup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneInfo {
    pub task_id: TaskId,
    pub user: String,
    pub task_type: TaskType,
    pub source: String,
    pub destination: String,
    pub file_type: FileType,
    pub is_lazy: bool,
    pub status: TaskStatus,
    pub next_step: CloneStep,
    /// Volume id of the temporary clone file. Set once `next_step` has
    /// advanced past `CreateCloneFile`.
    pub origin_id: Option<u64>,
    /// Volume id of the final destination. Equals `origin_id` for
    /// Clone; for Recover, the pre-existing destination's id.
    pub dest_id: Option<u64>,
    pub create_time: u64,
    pub progress: u8,
}

impl CloneInfo {
    pub fn is_snapshot(&self) -> bool {
        self.file_type == FileType::Snapshot
    }

    pub fn is_recover(&self) -> bool {
        self.task_type == TaskType::Recover
    }

    pub fn is_clone(&self) -> bool {
        self.task_type == TaskType::Clone
    }
}
