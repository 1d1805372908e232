//! Stable, numerically-identified error codes surfaced at the boundary.
//! Clients match on the discriminant, not the `Display` text.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    FileNotExist = 1,
    InvalidUser = 2,
    InvalidSnapshot = 3,
    InternalError = 4,
    SnapshotCannotCreateWhenError = 5,
    ChunkSizeNotAligned = 6,
    TaskExist = 7,
    CannotCleanCloneNotError = 8,
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCode::Success => "success",
            ErrorCode::FileNotExist => "file not exist",
            ErrorCode::InvalidUser => "invalid user",
            ErrorCode::InvalidSnapshot => "invalid snapshot",
            ErrorCode::InternalError => "internal error",
            ErrorCode::SnapshotCannotCreateWhenError => {
                "cannot create clone/recover: an errored task already exists for this destination"
            }
            ErrorCode::ChunkSizeNotAligned => "chunk size not aligned to split size",
            ErrorCode::TaskExist => "cleanup already in progress",
            ErrorCode::CannotCleanCloneNotError => "cannot clean a task that is not in Error",
        };
        write!(f, "{name} ({})", self.code())
    }
}
