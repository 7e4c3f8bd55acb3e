//! JSON-file-backed task store

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tracing::{info, warn};

use lecture_common::{
    HistoryEntry, HistoryPage, Stage, StageStatus, StorageConfig, Task, TaskStatus,
};

use crate::dedup::normalized_name;
use crate::{StoreError, StoreResult};

/// Durable keyed storage of tasks and their stage records
pub struct TaskStore {
    config: StorageConfig,
    tasks: RwLock<HashMap<String, Task>>,
}

impl TaskStore {
    /// Open the store, creating storage directories and loading the
    /// persisted task index if present
    pub async fn open(config: StorageConfig) -> StoreResult<Self> {
        tokio::fs::create_dir_all(&config.upload_dir).await?;
        tokio::fs::create_dir_all(&config.output_dir).await?;

        let index_path = config.task_index_path();
        let tasks = if index_path.exists() {
            let data = tokio::fs::read(&index_path).await?;
            let list: Vec<Task> = serde_json::from_slice(&data)?;
            info!("Loaded {} task records from {:?}", list.len(), index_path);
            list.into_iter().map(|t| (t.task_id.clone(), t)).collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            config,
            tasks: RwLock::new(tasks),
        })
    }

    /// Storage configuration this store was opened with
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Persist the full index. Callers must hold the write lock.
    async fn persist(&self, tasks: &HashMap<String, Task>) -> StoreResult<()> {
        let mut list: Vec<&Task> = tasks.values().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let data = serde_json::to_vec_pretty(&list)?;

        let index_path = self.config.task_index_path();
        let tmp_path = index_path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &index_path).await?;
        Ok(())
    }

    /// Advance `updated_at`, keeping it strictly increasing even when the
    /// clock has not ticked between consecutive writes
    pub(crate) fn bump_updated_at(task: &mut Task) {
        let now = Utc::now();
        task.updated_at = if now > task.updated_at {
            now
        } else {
            task.updated_at + Duration::milliseconds(1)
        };
    }

    /// Create a new task record
    pub async fn create(&self, task: Task) -> StoreResult<Task> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.task_id) {
            return Err(StoreError::Conflict(format!(
                "task {} already exists",
                task.task_id
            )));
        }
        tokio::fs::create_dir_all(task.intermediate_dir()).await?;
        tasks.insert(task.task_id.clone(), task.clone());
        self.persist(&tasks).await?;
        info!("Created task {} ({})", task.task_id, task.video_name);
        Ok(task)
    }

    /// Fetch a task snapshot
    pub async fn get(&self, task_id: &str) -> StoreResult<Task> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    /// Whether a task exists
    pub async fn exists(&self, task_id: &str) -> bool {
        self.tasks.read().await.contains_key(task_id)
    }

    /// All task snapshots, newest first
    pub async fn list_all(&self) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut list: Vec<Task> = tasks.values().cloned().collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        list
    }

    /// Mutate a task under the write lock and persist the result
    async fn update<F>(&self, task_id: &str, mutate: F) -> StoreResult<Task>
    where
        F: FnOnce(&mut Task) -> StoreResult<()>,
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        mutate(task)?;
        Self::bump_updated_at(task);
        let snapshot = task.clone();
        self.persist(&tasks).await?;
        Ok(snapshot)
    }

    /// Mark a stage `in_progress`. Rejected unless every earlier stage is
    /// completed, so a reader can never observe an out-of-order pipeline.
    pub async fn begin_stage(&self, task_id: &str, stage: Stage) -> StoreResult<Task> {
        self.update(task_id, |task| {
            if !task.can_start_from(stage) {
                return Err(StoreError::Conflict(format!(
                    "stage {} cannot start before earlier stages complete",
                    stage.name()
                )));
            }
            let record = task.stage_mut(stage);
            record.status = StageStatus::InProgress;
            record.started_at = Some(Utc::now());
            record.completed_at = None;
            record.result_file = None;
            record.error = None;
            Ok(())
        })
        .await
    }

    /// Mark a stage `completed` with its artifact file name
    pub async fn complete_stage(
        &self,
        task_id: &str,
        stage: Stage,
        result_file: &str,
    ) -> StoreResult<Task> {
        self.update(task_id, |task| {
            let record = task.stage_mut(stage);
            if record.status != StageStatus::InProgress {
                return Err(StoreError::Conflict(format!(
                    "stage {} is not in progress",
                    stage.name()
                )));
            }
            record.status = StageStatus::Completed;
            record.completed_at = Some(Utc::now());
            record.result_file = Some(result_file.to_string());
            record.error = None;
            Ok(())
        })
        .await
    }

    /// Mark a stage `failed` with an error message
    pub async fn fail_stage(&self, task_id: &str, stage: Stage, error: &str) -> StoreResult<Task> {
        self.update(task_id, |task| {
            let record = task.stage_mut(stage);
            record.status = StageStatus::Failed;
            record.completed_at = Some(Utc::now());
            record.result_file = None;
            record.error = Some(error.to_string());
            Ok(())
        })
        .await
    }

    /// Set the overall task status
    pub async fn set_overall_status(&self, task_id: &str, status: TaskStatus) -> StoreResult<Task> {
        self.update(task_id, |task| {
            task.overall_status = status;
            Ok(())
        })
        .await
    }

    /// Record the video duration once audio extraction knows it
    pub async fn set_duration(&self, task_id: &str, duration: f64) -> StoreResult<Task> {
        self.update(task_id, |task| {
            task.duration = Some(duration);
            Ok(())
        })
        .await
    }

    /// Record the generated lecture title
    pub async fn set_lecture_title(&self, task_id: &str, title: &str) -> StoreResult<Task> {
        self.update(task_id, |task| {
            task.lecture_title = Some(title.to_string());
            Ok(())
        })
        .await
    }

    /// Replace the stored hotwords
    pub async fn set_hotwords(&self, task_id: &str, hotwords: Vec<String>) -> StoreResult<Task> {
        self.update(task_id, |task| {
            task.hotwords = hotwords;
            Ok(())
        })
        .await
    }

    /// Reset stage records from `stage` onward to pending and delete their
    /// prior artifacts. Earlier stages are untouched. Deleting an artifact
    /// that is already missing is not an error.
    pub async fn reset_from(&self, task_id: &str, stage: Stage) -> StoreResult<Task> {
        let task = self
            .update(task_id, |task| {
                task.reset_from(stage);
                Ok(())
            })
            .await?;

        let intermediate = task.intermediate_dir();
        for later in Stage::ALL.iter().filter(|s| s.id() >= stage.id()) {
            let path = intermediate.join(later.result_file_name());
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete stage artifact {:?}: {}", path, e);
                }
            }
        }
        Ok(task)
    }

    /// Page of history entries, newest first
    pub async fn history(&self, limit: usize, offset: usize) -> HistoryPage {
        let list = self.list_all().await;
        let total = list.len();
        let items = list
            .iter()
            .skip(offset)
            .take(limit)
            .map(HistoryEntry::from)
            .collect();
        HistoryPage { items, total }
    }

    /// Prior tasks whose normalized video name matches `filename`
    pub async fn find_duplicates(&self, filename: &str) -> Vec<HistoryEntry> {
        let target = normalized_name(filename);
        self.list_all()
            .await
            .iter()
            .filter(|t| normalized_name(&t.video_name) == target)
            .map(HistoryEntry::from)
            .collect()
    }

    /// Delete a task record and, unless suppressed, its artifacts.
    /// Deleting already-missing files is not an error.
    pub async fn delete(&self, task_id: &str, delete_files: bool) -> StoreResult<()> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .remove(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        self.persist(&tasks).await?;
        drop(tasks);

        if delete_files {
            self.delete_artifacts(&task).await;
        }
        info!("Deleted task {}", task_id);
        Ok(())
    }

    /// Remove a task's output directory and its uploaded video (only when
    /// the video lives inside the managed upload directory)
    pub(crate) async fn delete_artifacts(&self, task: &Task) {
        if let Err(e) = tokio::fs::remove_dir_all(&task.output_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to delete output dir {:?}: {}", task.output_dir, e);
            }
        }
        if task.video_path.starts_with(&self.config.upload_dir) {
            if let Err(e) = tokio::fs::remove_file(&task.video_path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete video {:?}: {}", task.video_path, e);
                }
            }
        }
    }

    /// Apply a raw mutation during startup reconciliation. Not exposed to
    /// runtime callers; the reconcile pass is the only user.
    pub(crate) async fn with_tasks_mut<F, T>(&self, mutate: F) -> StoreResult<T>
    where
        F: FnOnce(&mut HashMap<String, Task>) -> T,
    {
        let mut tasks = self.tasks.write().await;
        let result = mutate(&mut tasks);
        self.persist(&tasks).await?;
        Ok(result)
    }

    /// Output directory for a new task, named after the stored video file
    #[must_use]
    pub fn output_dir_for(&self, video_path: &std::path::Path) -> PathBuf {
        let stem = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.config.output_dir.join(stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StorageConfig {
        StorageConfig {
            upload_dir: dir.path().join("uploads"),
            output_dir: dir.path().join("outputs"),
        }
    }

    async fn test_store(dir: &TempDir) -> TaskStore {
        TaskStore::open(test_config(dir)).await.unwrap()
    }

    fn make_task(config: &StorageConfig, id: &str, name: &str) -> Task {
        let video_path = config.upload_dir.join(format!(
            "{}_{}.mp4",
            name.trim_end_matches(".mp4"),
            id
        ));
        let output_dir = config
            .output_dir
            .join(format!("{}_{}", name.trim_end_matches(".mp4"), id));
        Task::new(
            id.to_string(),
            name.to_string(),
            video_path,
            output_dir,
            vec![],
        )
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        let task = make_task(store.config(), "t1", "intro.mp4");
        store.create(task.clone()).await.unwrap();

        let loaded = store.get("t1").await.unwrap();
        assert_eq!(loaded.video_name, "intro.mp4");
        assert_eq!(loaded.overall_status, TaskStatus::Pending);
        assert!(loaded.intermediate_dir().exists());

        assert!(matches!(
            store.get("missing").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            store.create(task).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_stage_transitions_and_updated_at() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        let task = make_task(store.config(), "t1", "intro.mp4");
        store.create(task).await.unwrap();

        let t0 = store.get("t1").await.unwrap().updated_at;
        let after_begin = store.begin_stage("t1", Stage::ExtractAudio).await.unwrap();
        assert!(after_begin.updated_at > t0);
        let record = after_begin.stage(Stage::ExtractAudio);
        assert_eq!(record.status, StageStatus::InProgress);
        assert!(record.started_at.is_some());

        let after_complete = store
            .complete_stage("t1", Stage::ExtractAudio, "stage_1_extract_audio.json")
            .await
            .unwrap();
        assert!(after_complete.updated_at > after_begin.updated_at);
        let record = after_complete.stage(Stage::ExtractAudio);
        assert_eq!(record.status, StageStatus::Completed);
        assert_eq!(
            record.result_file.as_deref(),
            Some("stage_1_extract_audio.json")
        );
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_begin_stage_enforces_order() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        store
            .create(make_task(store.config(), "t1", "intro.mp4"))
            .await
            .unwrap();

        // asr cannot start while extract_audio is pending
        assert!(matches!(
            store.begin_stage("t1", Stage::Asr).await,
            Err(StoreError::Conflict(_))
        ));

        store.begin_stage("t1", Stage::ExtractAudio).await.unwrap();
        store
            .complete_stage("t1", Stage::ExtractAudio, "stage_1_extract_audio.json")
            .await
            .unwrap();
        assert!(store.begin_stage("t1", Stage::Asr).await.is_ok());
    }

    #[tokio::test]
    async fn test_fail_stage_records_error() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        store
            .create(make_task(store.config(), "t1", "intro.mp4"))
            .await
            .unwrap();

        store.begin_stage("t1", Stage::ExtractAudio).await.unwrap();
        let task = store
            .fail_stage("t1", Stage::ExtractAudio, "ffmpeg exited with code 1")
            .await
            .unwrap();
        let record = task.stage(Stage::ExtractAudio);
        assert_eq!(record.status, StageStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("ffmpeg exited with code 1"));
        assert!(record.result_file.is_none());
    }

    #[tokio::test]
    async fn test_reset_from_deletes_artifacts() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        let task = make_task(store.config(), "t1", "intro.mp4");
        let intermediate = task.intermediate_dir();
        store.create(task).await.unwrap();

        for stage in [Stage::ExtractAudio, Stage::Asr] {
            store.begin_stage("t1", stage).await.unwrap();
            let file = stage.result_file_name();
            tokio::fs::write(intermediate.join(&file), b"{}").await.unwrap();
            store.complete_stage("t1", stage, &file).await.unwrap();
        }

        let task = store.reset_from("t1", Stage::Asr).await.unwrap();
        assert_eq!(
            task.stage(Stage::ExtractAudio).status,
            StageStatus::Completed
        );
        assert_eq!(task.stage(Stage::Asr).status, StageStatus::Pending);
        assert!(intermediate
            .join(Stage::ExtractAudio.result_file_name())
            .exists());
        assert!(!intermediate.join(Stage::Asr.result_file_name()).exists());

        // Resetting again with artifacts already gone is fine
        assert!(store.reset_from("t1", Stage::Asr).await.is_ok());
    }

    #[tokio::test]
    async fn test_history_paging_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        for (i, id) in ["t1", "t2", "t3"].iter().enumerate() {
            let mut task = make_task(store.config(), id, &format!("video{id}.mp4"));
            task.created_at = Utc::now() + Duration::seconds(i as i64);
            task.updated_at = task.created_at;
            store.create(task).await.unwrap();
        }

        let page = store.history(2, 0).await;
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].id, "t3");
        assert_eq!(page.items[1].id, "t2");

        let page = store.history(2, 2).await;
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "t1");
    }

    #[tokio::test]
    async fn test_find_duplicates_on_normalized_name() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        let id = "7f3a2b1c-9d4e-4f6a-8b2c-1e5d7a9c3b0f";
        store
            .create(make_task(
                store.config(),
                id,
                &format!("lecture_{id}.mp4"),
            ))
            .await
            .unwrap();
        store
            .create(make_task(store.config(), "t2", "other.mp4"))
            .await
            .unwrap();

        let matches = store.find_duplicates("lecture.mp4").await;
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, id);

        assert!(store.find_duplicates("unrelated.mp4").await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_on_files() {
        let dir = TempDir::new().unwrap();
        let store = test_store(&dir).await;
        let task = make_task(store.config(), "t1", "intro.mp4");
        let output_dir = task.output_dir.clone();
        store.create(task).await.unwrap();

        // Output dir already removed externally; delete must still succeed
        tokio::fs::remove_dir_all(&output_dir).await.unwrap();
        store.delete("t1", true).await.unwrap();
        assert!(!store.exists("t1").await);

        assert!(matches!(
            store.delete("t1", true).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_persistence_across_reopen() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);
        {
            let store = TaskStore::open(config.clone()).await.unwrap();
            store
                .create(make_task(&config, "t1", "intro.mp4"))
                .await
                .unwrap();
            store.begin_stage("t1", Stage::ExtractAudio).await.unwrap();
        }

        let store = TaskStore::open(config).await.unwrap();
        let task = store.get("t1").await.unwrap();
        assert_eq!(
            task.stage(Stage::ExtractAudio).status,
            StageStatus::InProgress
        );
    }
}
