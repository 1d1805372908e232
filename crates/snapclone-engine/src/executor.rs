//! The step executor: rebuilds the in-memory plan for a task, drives
//! its `CloneStep` state machine forward to `End` (or a recorded
//! `Error`), persisting after every step.

use snapclone_core::{progress, CloneInfo, CloneStep, ErrorCode, FileType, TaskStatus};

use crate::engine::{Engine, EngineError};
use crate::plan::{self, CloneSegmentMap, PlannedFile};
use crate::ports::VolumeError;

fn temp_file_name(clone_temp_dir: &std::path::Path, task_id: &snapclone_core::TaskId) -> String {
    clone_temp_dir.join(task_id.as_str()).to_string_lossy().into_owned()
}

/// Which volume name is currently live for a task mid-pipeline. Lazy
/// tasks rename before recovering data; eager tasks rename last — so
/// whichever of `RecoverChunk`/`CompleteCloneFile` runs after the
/// rename must address the destination, not the temp file.
fn active_name<'a>(is_lazy: bool, temp: &'a str, destination: &'a str) -> &'a str {
    if is_lazy {
        destination
    } else {
        temp
    }
}

impl Engine {
    /// Runs `task_id` forward until it reaches `End` (success) or a
    /// step handler reports a terminal failure. Safe to call again
    /// after a crash: every handler tolerates re-execution from
    /// wherever `next_step` was last persisted.
    pub async fn run_task(&self, task_id: &snapclone_core::TaskId) -> Result<(), EngineError> {
        let _guard = self.task_locks.lock(task_id).await;
        let mut info = self.tasks.get_clone_info(task_id).await?;

        if info.status != TaskStatus::Cloning {
            tracing::debug!(task_id = %task_id, status = ?info.status, "run_task called on non-cloning task, skipping");
            return Ok(());
        }

        let (planned, mut seg_map) = match self.build_plan(&info).await {
            Ok(v) => v,
            Err(e) => return self.handle_clone_error(&mut info, e).await,
        };

        if info.next_step.needs_meta_refresh() {
            if let Err(e) = self.create_or_update_clone_meta(&info, &planned, &mut seg_map).await {
                return self.handle_clone_error(&mut info, e).await;
            }
        }

        loop {
            let step = info.next_step;
            if step == CloneStep::End {
                break;
            }
            tracing::info!(task_id = %task_id, ?step, "running step");
            let result = self.run_step(&mut info, step, &planned, &mut seg_map).await;
            if let Err(e) = result {
                return self.handle_clone_error(&mut info, e).await;
            }
            info.next_step = step.next(info.is_lazy);
            info.progress = progress_for(step, info.progress);
            self.tasks.update_clone_info(&info).await?;
        }

        self.handle_clone_success(&mut info).await
    }

    /// Recomputes the temp file's shape and the sparse chunk map from
    /// scratch. Always runs, including on restart — it's pure/read-only
    /// I/O, so recomputing it is cheap and keeps the plan in sync with
    /// whatever the source looks like right now.
    async fn build_plan(&self, info: &CloneInfo) -> Result<(PlannedFile, CloneSegmentMap), EngineError> {
        match info.file_type {
            FileType::Snapshot => {
                let snapshot = self
                    .snapshot_meta
                    .get_snapshot_info(&info.source)
                    .await
                    .ok_or_else(|| {
                        EngineError::new(ErrorCode::InvalidSnapshot, "snapshot disappeared mid-task")
                    })?;

                let seqnum = if info.is_recover() {
                    let dest = self.volume.get_file_info(&info.destination, &info.user).await?;
                    dest.seqnum + 1
                } else {
                    self.config.initial_seq_num
                };
                let planned = plan::plan_from_snapshot(&snapshot, seqnum);

                let chunk_index_data = self
                    .snapshot_data
                    .get_chunk_index_data(&snapshot.file_name, snapshot.seq_num)
                    .await?;
                let seg_map = plan::build_segment_map_from_snapshot(
                    snapshot.segment_size,
                    snapshot.chunk_size,
                    &chunk_index_data,
                    info.is_recover(),
                    self.config.initial_seq_num,
                );
                Ok((planned, seg_map))
            }
            FileType::File => {
                let source = self.volume.get_file_info(&info.source, &info.user).await?;
                if source.segment_size == 0 || source.length % source.segment_size != 0 {
                    return Err(EngineError::new(
                        ErrorCode::InternalError,
                        "source file length is not aligned to its segment size",
                    ));
                }
                let planned = plan::plan_from_file(&source, self.config.initial_seq_num);

                let mut seg_map = CloneSegmentMap::new();
                for (index, (start, _end)) in
                    plan::segment_ranges(source.length, source.segment_size).into_iter().enumerate()
                {
                    let segment = self
                        .volume
                        .get_or_allocate_segment_info(false, start, &source, &info.user)
                        .await?;
                    let Some(segment) = segment else { continue };
                    if let Some(seg_plan) = plan::segment_plan_from_file_chunks(
                        &segment.chunks,
                        start,
                        source.chunk_size,
                        &info.destination,
                        self.config.initial_seq_num,
                    ) {
                        seg_map.insert(index as u64, seg_plan);
                    }
                }
                Ok((planned, seg_map))
            }
        }
    }

    async fn run_step(
        &self,
        info: &mut CloneInfo,
        step: CloneStep,
        planned: &PlannedFile,
        seg_map: &mut CloneSegmentMap,
    ) -> Result<(), EngineError> {
        match step {
            CloneStep::CreateCloneFile => self.step_create_clone_file(info, planned).await,
            CloneStep::CreateCloneMeta => self.create_or_update_clone_meta(info, planned, seg_map).await,
            CloneStep::CreateCloneChunk => self.step_create_clone_chunk(planned, seg_map).await,
            CloneStep::CompleteCloneMeta => self.step_complete_clone_meta(info).await,
            CloneStep::RecoverChunk => self.step_recover_chunk(info, planned, seg_map).await,
            CloneStep::RenameCloneFile => self.step_rename_clone_file(info).await,
            CloneStep::CompleteCloneFile => self.step_complete_clone_file(info).await,
            CloneStep::End => Ok(()),
        }
    }

    async fn step_create_clone_file(
        &self,
        info: &mut CloneInfo,
        planned: &PlannedFile,
    ) -> Result<(), EngineError> {
        let temp_name = temp_file_name(&self.config.clone_temp_dir, &info.task_id);
        let file = self
            .volume
            .create_clone_file(&temp_name, &info.user, planned.length, planned.seqnum, planned.chunk_size)
            .await?;
        info.origin_id = Some(file.id);
        if info.is_clone() {
            info.dest_id = Some(file.id);
        }
        Ok(())
    }

    /// Re-reads the temp file's real metadata, then force-allocates
    /// every segment present in `seg_map` and binds the resulting
    /// `ChunkIdInfo`s back onto the plan. Runs both as the
    /// `CreateCloneMeta` step itself and, on restart past that step, as
    /// a refresh before resuming.
    async fn create_or_update_clone_meta(
        &self,
        info: &CloneInfo,
        planned: &PlannedFile,
        seg_map: &mut CloneSegmentMap,
    ) -> Result<(), EngineError> {
        let temp_name = temp_file_name(&self.config.clone_temp_dir, &info.task_id);
        let file = self.volume.get_file_info(&temp_name, &info.user).await?;
        for (&segment_index, segment_plan) in seg_map.iter_mut() {
            let offset = segment_index * planned.segment_size;
            let segment = self
                .volume
                .get_or_allocate_segment_info(true, offset, &file, &info.user)
                .await?;
            let Some(segment) = segment else { continue };
            for (&chunk_in_segment, chunk_plan) in segment_plan.iter_mut() {
                if let Some(chunk) = segment.chunks.get(chunk_in_segment as usize) {
                    chunk_plan.chunk_id_info = Some(*chunk);
                }
            }
        }
        Ok(())
    }

    async fn step_create_clone_chunk(
        &self,
        planned: &PlannedFile,
        seg_map: &CloneSegmentMap,
    ) -> Result<(), EngineError> {
        let correct_sn = planned.seqnum;
        for segment_plan in seg_map.values() {
            for chunk_plan in segment_plan.values() {
                let chunk_id_info = chunk_plan.chunk_id_info.ok_or_else(|| {
                    EngineError::new(ErrorCode::InternalError, "chunk allocated with no chunk_id_info")
                })?;
                self.volume
                    .create_clone_chunk(
                        &chunk_plan.location.encode(),
                        chunk_id_info,
                        chunk_plan.seq_num,
                        correct_sn,
                        planned.chunk_size,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn step_complete_clone_meta(&self, info: &CloneInfo) -> Result<(), EngineError> {
        let temp_name = temp_file_name(&self.config.clone_temp_dir, &info.task_id);
        self.volume.complete_clone_meta(&temp_name, &info.user).await?;
        Ok(())
    }

    /// Recovers every planned chunk's data, splitting each chunk into
    /// `chunk_size / clone_chunk_split_size` sequential recovery calls.
    /// Progress is interpolated across segments (not chunks) and
    /// persisted after each one completes, so a crash mid-recovery
    /// leaves the last fully-recovered segment's progress durable.
    async fn step_recover_chunk(
        &self,
        info: &mut CloneInfo,
        planned: &PlannedFile,
        seg_map: &CloneSegmentMap,
    ) -> Result<(), EngineError> {
        let split_size = self.config.clone_chunk_split_size;
        if split_size == 0 || planned.chunk_size as u64 % split_size != 0 {
            return Err(EngineError::new(
                ErrorCode::ChunkSizeNotAligned,
                format!(
                    "chunk size {} is not a multiple of clone_chunk_split_size {split_size}",
                    planned.chunk_size
                ),
            ));
        }

        let segment_count = seg_map.len().max(1);
        let span = (progress::RECOVER_CHUNK_END - progress::RECOVER_CHUNK_BEGIN) as f64;
        let progress_per_segment = span / segment_count as f64;

        for (index, segment_plan) in seg_map.values().enumerate() {
            for chunk_plan in segment_plan.values() {
                let chunk_id_info = chunk_plan.chunk_id_info.ok_or_else(|| {
                    EngineError::new(ErrorCode::InternalError, "chunk allocated with no chunk_id_info")
                })?;
                self.recover_one_chunk(&chunk_id_info, planned.chunk_size as u64, split_size).await?;
            }
            info.progress = (progress::RECOVER_CHUNK_BEGIN as f64 + index as f64 * progress_per_segment) as u8;
            self.tasks.update_clone_info(info).await?;
        }
        Ok(())
    }

    async fn recover_one_chunk(
        &self,
        chunk: &crate::ports::ChunkIdInfo,
        chunk_size: u64,
        split_size: u64,
    ) -> Result<(), EngineError> {
        let mut offset = 0;
        while offset < chunk_size {
            self.volume.recover_chunk(*chunk, offset, split_size).await?;
            offset += split_size;
        }
        Ok(())
    }

    /// Checks whether the temp file still exists under `origin_id`
    /// first; only if it's gone does it fall back to checking that the
    /// destination already carries `origin_id`, which means a prior
    /// crashed run already renamed it.
    async fn step_rename_clone_file(&self, info: &mut CloneInfo) -> Result<(), EngineError> {
        let temp_name = temp_file_name(&self.config.clone_temp_dir, &info.task_id);
        let origin_id = info
            .origin_id
            .ok_or_else(|| EngineError::new(ErrorCode::InternalError, "origin_id unset before rename"))?;
        let dest_id = info.dest_id.unwrap_or(origin_id);

        match self.volume.get_file_info(&temp_name, &info.user).await {
            Ok(origin) => {
                if origin.id != origin_id {
                    return Err(EngineError::new(
                        ErrorCode::InternalError,
                        format!("temp file {temp_name} exists under an unexpected id"),
                    ));
                }
                self.volume
                    .rename_clone_file(&info.user, origin_id, dest_id, &temp_name, &info.destination)
                    .await?;
                Ok(())
            }
            Err(VolumeError::NotExist) => {
                let dest = self.volume.get_file_info(&info.destination, &info.user).await?;
                if dest.id != origin_id {
                    return Err(EngineError::new(
                        ErrorCode::InternalError,
                        format!("temp file {temp_name} is missing and destination id does not match"),
                    ));
                }
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn step_complete_clone_file(&self, info: &CloneInfo) -> Result<(), EngineError> {
        let temp_name = temp_file_name(&self.config.clone_temp_dir, &info.task_id);
        let active = active_name(info.is_lazy, &temp_name, &info.destination);
        self.volume.complete_clone_file(active, &info.user).await?;
        Ok(())
    }

    async fn handle_clone_success(&self, info: &mut CloneInfo) -> Result<(), EngineError> {
        info.status = TaskStatus::Done;
        info.progress = progress::COMPLETE;
        if info.is_snapshot() {
            self.ref_counts.decrement(&info.source);
        }
        self.tasks.update_clone_info(info).await?;
        tracing::info!(task_id = %info.task_id, "task completed successfully");
        Ok(())
    }

    async fn handle_clone_error(
        &self,
        info: &mut CloneInfo,
        error: EngineError,
    ) -> Result<(), EngineError> {
        tracing::warn!(task_id = %info.task_id, %error, "task failed");
        info.status = TaskStatus::Error;
        if info.is_snapshot() {
            self.ref_counts.decrement(&info.source);
        }
        self.tasks.update_clone_info(info).await?;
        Err(error)
    }
}

/// Progress milestones per completed step. `RecoverChunk` publishes its
/// own interpolated values as it runs, so by the time it finishes
/// `current` already holds the right value; this function's
/// `RecoverChunk` arm just carries that through.
fn progress_for(completed_step: CloneStep, current: u8) -> u8 {
    match completed_step {
        CloneStep::CreateCloneFile => progress::CREATE_CLONE_FILE,
        CloneStep::CreateCloneMeta => progress::CREATE_CLONE_META,
        CloneStep::CreateCloneChunk => progress::CREATE_CLONE_CHUNK,
        CloneStep::CompleteCloneMeta => current,
        CloneStep::RecoverChunk => progress::RECOVER_CHUNK_END,
        CloneStep::RenameCloneFile => current,
        CloneStep::CompleteCloneFile => current,
        CloneStep::End => progress::COMPLETE,
    }
}
