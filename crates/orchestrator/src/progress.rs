//! Per-task fan-out of progress events to live subscribers
//!
//! Delivery is best-effort: the hub keeps no replay buffer, and a slow
//! subscriber that overflows its channel simply misses events. Subscribers
//! resynchronize by fetching the task snapshot from the store.

use std::collections::HashMap;

use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use lecture_common::{ProgressEvent, Task};

/// Buffered events per subscriber before older ones are dropped
const CHANNEL_CAPACITY: usize = 64;

/// Fans out [`ProgressEvent`]s to subscribers keyed by task id
#[derive(Default)]
pub struct ProgressHub {
    channels: Mutex<HashMap<String, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressHub {
    /// Create an empty hub
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events for one task
    ///
    /// Channels whose subscribers all went away are pruned here, so tasks
    /// that never publish again do not pin map entries.
    pub async fn subscribe(&self, task_id: &str) -> broadcast::Receiver<ProgressEvent> {
        let mut channels = self.channels.lock().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(task_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event to current subscribers of its task, if any
    pub async fn publish(&self, event: ProgressEvent) {
        let mut channels = self.channels.lock().await;
        let Some(sender) = channels.get(&event.task_id) else {
            return;
        };
        if sender.send(event.clone()).is_err() {
            // Last subscriber went away; drop the channel
            debug!("No subscribers left for task {}", event.task_id);
            channels.remove(&event.task_id);
        }
    }
}

/// Build the snapshot event a subscriber receives immediately on connect
#[must_use]
pub fn snapshot_event(task: &Task) -> ProgressEvent {
    let (stage, progress) = match task.current_stage() {
        Some(stage) => (stage.name().to_string(), 0),
        None => ("done".to_string(), 100),
    };
    ProgressEvent {
        task_id: task.task_id.clone(),
        stage,
        progress,
        message: "current state".to_string(),
        stages: task.stages.clone(),
    }
}
