//! Admission: validates a new clone/recover request, classifies its
//! source, and durably records the task before accepting it —
//! everything after this point is the step executor's job.

use snapclone_core::{CloneInfo, CloneStep, ErrorCode, FileType, TaskStatus, TaskType};

use crate::engine::{Engine, EngineError};
use crate::ports::VolumeError;

/// What a caller asks for. `destination` for Clone is a brand-new
/// volume name; for Recover it must already exist.
#[derive(Debug, Clone)]
pub struct CloneRequest {
    pub task_type: TaskType,
    pub user: String,
    pub source: String,
    pub destination: String,
    pub is_lazy: bool,
}

impl Engine {
    /// Admits `request`, returning the newly minted task id.
    ///
    /// Classifies the source first (snapshot takes priority over file —
    /// a source id that happens to collide with a live file name is
    /// still a snapshot if the snapshot store knows it), then checks
    /// for a conflicting errored task against the same destination,
    /// then — for Recover — confirms the destination exists.
    pub async fn admit(&self, request: CloneRequest) -> Result<snapclone_core::TaskId, EngineError> {
        let (file_type, dest_id) = self.classify_and_resolve(&request).await?;

        let existing = self.get_clone_info_list().await?;
        let conflict = existing
            .iter()
            .any(|t| t.destination == request.destination && t.status == TaskStatus::Error);
        if conflict {
            return Err(EngineError::new(
                ErrorCode::SnapshotCannotCreateWhenError,
                format!(
                    "an errored task already targets destination {}; clean it up first",
                    request.destination
                ),
            ));
        }

        let task_id = self.ids.new_task_id();
        let now = crate::clock::unix_time_seconds();

        let info = CloneInfo {
            task_id: task_id.clone(),
            user: request.user.clone(),
            task_type: request.task_type,
            source: request.source.clone(),
            destination: request.destination.clone(),
            file_type,
            is_lazy: request.is_lazy,
            status: TaskStatus::Cloning,
            next_step: CloneStep::CreateCloneFile,
            origin_id: None,
            dest_id,
            create_time: now,
            progress: 0,
        };

        if file_type == FileType::Snapshot {
            self.ref_counts.increment(&request.source);
        }

        if let Err(e) = self.tasks.add_clone_info(info).await {
            if file_type == FileType::Snapshot {
                self.ref_counts.decrement(&request.source);
            }
            return Err(e.into());
        }

        tracing::info!(task_id = %task_id, source = %request.source, destination = %request.destination, "task admitted");
        Ok(task_id)
    }

    async fn classify_and_resolve(
        &self,
        request: &CloneRequest,
    ) -> Result<(FileType, Option<u64>), EngineError> {
        if let Some(snapshot) = self.snapshot_meta.get_snapshot_info(&request.source).await {
            if snapshot.status != crate::ports::SnapshotStatus::Done {
                return Err(EngineError::new(
                    ErrorCode::InvalidSnapshot,
                    format!("snapshot {} is not in Done status", request.source),
                ));
            }
            if snapshot.user != request.user {
                return Err(EngineError::new(
                    ErrorCode::InvalidUser,
                    "snapshot owner does not match request user",
                ));
            }
            let dest_id = if request.task_type == TaskType::Recover {
                Some(self.resolve_recover_destination(request).await?)
            } else {
                None
            };
            return Ok((FileType::Snapshot, dest_id));
        }

        match self.volume.get_file_info(&request.source, &request.user).await {
            Ok(_source_file) => {
                let dest_id = if request.task_type == TaskType::Recover {
                    Some(self.resolve_recover_destination(request).await?)
                } else {
                    None
                };
                Ok((FileType::File, dest_id))
            }
            Err(VolumeError::NotExist) => Err(EngineError::new(
                ErrorCode::FileNotExist,
                format!("source {} does not exist", request.source),
            )),
            Err(VolumeError::AuthFail) => Err(EngineError::new(
                ErrorCode::InvalidUser,
                "not authorized to read source",
            )),
            Err(VolumeError::Other(msg)) => Err(EngineError::new(ErrorCode::InternalError, msg)),
        }
    }

    async fn resolve_recover_destination(&self, request: &CloneRequest) -> Result<u64, EngineError> {
        match self
            .volume
            .get_file_info(&request.destination, &request.user)
            .await
        {
            Ok(dest) => Ok(dest.id),
            Err(VolumeError::NotExist) => Err(EngineError::new(
                ErrorCode::FileNotExist,
                format!("recover destination {} does not exist", request.destination),
            )),
            Err(VolumeError::AuthFail) => Err(EngineError::new(
                ErrorCode::InvalidUser,
                "not authorized on recover destination",
            )),
            Err(VolumeError::Other(msg)) => Err(EngineError::new(ErrorCode::InternalError, msg)),
        }
    }
}
