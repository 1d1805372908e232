//! Cleanup of a failed task: only tasks in `Error` may be cleaned, and
//! cleanup is itself restart-safe.

use snapclone_core::{ErrorCode, TaskStatus, TaskType};

use crate::engine::{Engine, EngineError};
use crate::ports::VolumeError;

impl Engine {
    /// Admits a cleanup request: the task must be in `Error`. Moves it
    /// to `Cleaning` so a concurrent second cleanup request for the
    /// same task is rejected rather than running twice.
    pub async fn clean_pre(&self, task_id: &snapclone_core::TaskId) -> Result<(), EngineError> {
        let _guard = self.task_locks.lock(task_id).await;
        let mut info = self.tasks.get_clone_info(task_id).await?;
        match info.status {
            TaskStatus::Error => {}
            TaskStatus::Cleaning => {
                return Err(EngineError::new(
                    ErrorCode::TaskExist,
                    "cleanup already in progress for this task",
                ))
            }
            other => {
                return Err(EngineError::new(
                    ErrorCode::CannotCleanCloneNotError,
                    format!("task is in {other:?}, not Error"),
                ))
            }
        }
        info.status = TaskStatus::Cleaning;
        self.tasks.update_clone_info(&info).await?;
        Ok(())
    }

    /// Removes the temporary clone file (and, for an eager — non-lazy —
    /// clone, the partially-created destination), then drops the task
    /// record. `NotExist` from the volume client is success: a prior
    /// crashed cleanup attempt may already have deleted either file. Any
    /// other deletion failure routes back to `Error` (via
    /// `handle_clean_error`) rather than leaving the task stuck in
    /// `Cleaning` forever — the user can retry cleanup.
    pub async fn run_cleanup(&self, task_id: &snapclone_core::TaskId) -> Result<(), EngineError> {
        let _guard = self.task_locks.lock(task_id).await;
        let mut info = self.tasks.get_clone_info(task_id).await?;
        if info.status != TaskStatus::Cleaning {
            return Err(EngineError::new(
                ErrorCode::InternalError,
                "run_cleanup called on a task that isn't Cleaning",
            ));
        }

        let temp_name = self
            .config
            .clone_temp_dir
            .join(info.task_id.as_str())
            .to_string_lossy()
            .into_owned();
        let origin_id = info.origin_id.unwrap_or(0);
        if let Err(e) =
            delete_tolerant(self.volume.delete_file(&temp_name, &info.user, origin_id).await)
        {
            return self.handle_clean_error(&mut info, e).await;
        }

        if info.task_type == TaskType::Clone && !info.is_lazy {
            let dest_id = info.dest_id.unwrap_or(origin_id);
            if let Err(e) = delete_tolerant(
                self.volume
                    .delete_file(&info.destination, &info.user, dest_id)
                    .await,
            ) {
                return self.handle_clean_error(&mut info, e).await;
            }
        }

        self.tasks.delete_clone_info(task_id).await?;
        self.task_locks.forget(task_id);
        tracing::info!(task_id = %task_id, "task cleaned up");
        Ok(())
    }

    /// A cleanup step failed for a reason other than the target already
    /// being gone. Moves the task back to `Error` so cleanup can be
    /// re-admitted and retried, rather than leaving it stuck in
    /// `Cleaning`.
    async fn handle_clean_error(
        &self,
        info: &mut snapclone_core::CloneInfo,
        error: EngineError,
    ) -> Result<(), EngineError> {
        tracing::warn!(task_id = %info.task_id, %error, "cleanup step failed");
        info.status = TaskStatus::Error;
        self.tasks.update_clone_info(info).await?;
        Err(error)
    }
}

fn delete_tolerant(result: Result<(), VolumeError>) -> Result<(), EngineError> {
    match result {
        Ok(()) | Err(VolumeError::NotExist) => Ok(()),
        Err(e) => Err(e.into()),
    }
}
