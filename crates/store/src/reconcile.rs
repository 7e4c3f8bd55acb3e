//! Startup reconciliation between the task index and the filesystem
//!
//! Runs once before the server starts accepting requests. After it returns,
//! every task record points at artifacts that exist, no stage claims to be
//! running, and no artifact directory or upload is unaccounted for.

use std::collections::HashSet;
use std::path::Path;

use serde::Serialize;
use tracing::{info, warn};

use lecture_common::{StageStatus, TaskStatus};

use crate::dedup::embedded_task_id;
use crate::task_store::TaskStore;
use crate::StoreResult;

/// Summary of a startup reconciliation pass
#[derive(Debug, Default, Serialize)]
pub struct ReconcileReport {
    /// Task records dropped because their output directory vanished
    pub dropped_tasks: usize,
    /// Stages left `in_progress` by a dead process, now marked failed
    pub interrupted_stages: usize,
    /// Orphaned output directories deleted
    pub removed_outputs: usize,
    /// Orphaned uploaded videos deleted
    pub removed_uploads: usize,
}

impl TaskStore {
    /// Reconcile the task index with the filesystem
    pub async fn reconcile(&self) -> StoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();

        let (dropped, interrupted_artifacts) = self
            .with_tasks_mut(|tasks| {
                let mut artifacts = Vec::new();

                let before = tasks.len();
                tasks.retain(|task_id, task| {
                    if task.output_dir.is_dir() {
                        return true;
                    }
                    warn!(
                        "Dropping task {}: output dir {:?} is missing",
                        task_id, task.output_dir
                    );
                    false
                });
                let dropped = before - tasks.len();

                for task in tasks.values_mut() {
                    let intermediate = task.intermediate_dir();
                    let mut interrupted = false;
                    for record in &mut task.stages {
                        if record.status == StageStatus::InProgress {
                            record.status = StageStatus::Failed;
                            record.completed_at = None;
                            record.result_file = None;
                            record.error = Some("interrupted".to_string());
                            interrupted = true;
                            artifacts.push(intermediate.join(format!(
                                "stage_{}_{}.json",
                                record.stage_id, record.stage_name
                            )));
                        }
                    }
                    if interrupted || task.overall_status == TaskStatus::Processing {
                        task.overall_status = TaskStatus::Failed;
                        Self::bump_updated_at(task);
                    }
                }
                (dropped, artifacts)
            })
            .await?;

        report.dropped_tasks = dropped;
        report.interrupted_stages = interrupted_artifacts.len();
        for path in &interrupted_artifacts {
            if let Err(e) = tokio::fs::remove_file(path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete partial artifact {:?}: {}", path, e);
                }
            }
        }

        let tasks = self.list_all().await;
        let known_outputs: HashSet<_> = tasks.iter().map(|t| t.output_dir.clone()).collect();
        let known_videos: HashSet<_> = tasks.iter().map(|t| t.video_path.clone()).collect();
        let known_ids: HashSet<_> = tasks.iter().map(|t| t.task_id.clone()).collect();

        report.removed_outputs = self.sweep_outputs(&known_outputs).await?;
        report.removed_uploads = self.sweep_uploads(&known_videos, &known_ids).await?;

        info!(
            "Reconciled task index: dropped {} tasks, interrupted {} stages, removed {} output dirs and {} uploads",
            report.dropped_tasks,
            report.interrupted_stages,
            report.removed_outputs,
            report.removed_uploads
        );
        Ok(report)
    }

    /// Delete directories under the outputs root no task record points at
    async fn sweep_outputs(&self, known: &HashSet<std::path::PathBuf>) -> StoreResult<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.config().output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_dir() || known.contains(&path) {
                continue;
            }
            warn!("Removing orphaned output dir {:?}", path);
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                warn!("Failed to remove {:?}: {}", path, e);
            } else {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Delete uploaded videos no task record points at. A file whose name
    /// embeds an unknown task id is an orphan even if a same-named task
    /// was re-uploaded later.
    async fn sweep_uploads(
        &self,
        known_videos: &HashSet<std::path::PathBuf>,
        known_ids: &HashSet<String>,
    ) -> StoreResult<usize> {
        let mut removed = 0;
        let mut entries = tokio::fs::read_dir(&self.config().upload_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !path.is_file() || known_videos.contains(&path) {
                continue;
            }
            if !orphaned_upload(&path, known_ids) {
                continue;
            }
            warn!("Removing orphaned upload {:?}", path);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Failed to remove {:?}: {}", path, e);
            } else {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// An upload is orphaned when it is not referenced by any task and its
/// embedded task id (if any) is unknown. Files without an embedded id that
/// no task references are treated as orphans too.
fn orphaned_upload(path: &Path, known_ids: &HashSet<String>) -> bool {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().into_owned(),
        None => return false,
    };
    match embedded_task_id(&name) {
        Some(id) => !known_ids.contains(&id),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lecture_common::{Stage, StorageConfig, Task};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StorageConfig {
        StorageConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
        }
    }

    fn make_task(config: &StorageConfig, id: &str, name: &str) -> Task {
        let stem = name.trim_end_matches(".mp4");
        Task::new(
            id.to_string(),
            name.to_string(),
            config.upload_dir.join(format!("{stem}_{id}.mp4")),
            config.output_dir.join(format!("{stem}_{id}")),
            vec![],
        )
    }

    #[tokio::test]
    async fn test_drops_tasks_with_missing_output_dir() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = TaskStore::open(config.clone()).await.unwrap();
        let task = make_task(&config, "a1b2c3d4-0000-4000-8000-000000000001", "gone.mp4");
        let output_dir = task.output_dir.clone();
        store.create(task).await.unwrap();

        tokio::fs::remove_dir_all(&output_dir).await.unwrap();
        store.reconcile().await.unwrap();
        assert!(!store.exists("a1b2c3d4-0000-4000-8000-000000000001").await);
    }

    #[tokio::test]
    async fn test_marks_in_progress_stages_interrupted() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = TaskStore::open(config.clone()).await.unwrap();
        let id = "a1b2c3d4-0000-4000-8000-000000000002";
        let task = make_task(&config, id, "crash.mp4");
        let intermediate = task.intermediate_dir();
        store.create(task).await.unwrap();

        store.begin_stage(id, Stage::ExtractAudio).await.unwrap();
        store
            .complete_stage(id, Stage::ExtractAudio, "stage_1_extract_audio.json")
            .await
            .unwrap();
        store.begin_stage(id, Stage::Asr).await.unwrap();
        let partial = intermediate.join(Stage::Asr.result_file_name());
        tokio::fs::write(&partial, b"{").await.unwrap();

        let report = store.reconcile().await.unwrap();
        assert_eq!(report.interrupted_stages, 1);
        assert!(!partial.exists());

        let task = store.get(id).await.unwrap();
        assert_eq!(task.overall_status, lecture_common::TaskStatus::Failed);
        let record = task.stage(Stage::Asr);
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("interrupted"));
        // Completed earlier stage is untouched
        assert_eq!(
            task.stage(Stage::ExtractAudio).status,
            StageStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_interrupt_write_advances_updated_at() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = TaskStore::open(config.clone()).await.unwrap();
        let id = "a1b2c3d4-0000-4000-8000-000000000004";
        store.create(make_task(&config, id, "clock.mp4")).await.unwrap();
        store.begin_stage(id, Stage::ExtractAudio).await.unwrap();

        let before = store.get(id).await.unwrap().updated_at;
        store.reconcile().await.unwrap();
        let after = store.get(id).await.unwrap();

        // The interrupted-stage write counts as a stage-status write
        assert!(after.updated_at > before);
        assert_eq!(
            after.stage(Stage::ExtractAudio).error.as_deref(),
            Some("interrupted")
        );
    }

    #[tokio::test]
    async fn test_sweeps_orphaned_outputs_and_uploads() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        let store = TaskStore::open(config.clone()).await.unwrap();
        let id = "a1b2c3d4-0000-4000-8000-000000000003";
        let task = make_task(&config, id, "keep.mp4");
        let kept_video = task.video_path.clone();
        let kept_output = task.output_dir.clone();
        store.create(task).await.unwrap();
        tokio::fs::write(&kept_video, b"video").await.unwrap();

        let orphan_dir = config.output_dir.join("stray_dir");
        tokio::fs::create_dir_all(&orphan_dir).await.unwrap();
        let orphan_video = config
            .upload_dir
            .join("stray_a1b2c3d4-0000-4000-8000-00000000dead.mp4");
        tokio::fs::write(&orphan_video, b"video").await.unwrap();

        let report = store.reconcile().await.unwrap();
        assert_eq!(report.removed_outputs, 1);
        assert_eq!(report.removed_uploads, 1);
        assert!(!orphan_dir.exists());
        assert!(!orphan_video.exists());
        assert!(kept_video.exists());
        assert!(kept_output.exists());
        // The index file under the outputs root is never swept
        assert!(config.task_index_path().exists());
    }
}
