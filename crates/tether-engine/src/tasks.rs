use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use tether_core::ids::ConversationId;
use tether_core::tasks::{Task, TaskListUpdate, TaskStatus};
use tether_core::tools::ToolError;
use tokio::sync::{broadcast, Mutex};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Partial task record as supplied by `todo_write`. Fields left out keep
/// their current value on update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct TaskPatch {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
    #[serde(default)]
    pub dependency: Option<String>,
}

impl TaskPatch {
    fn apply_to(&self, task: &mut Task) {
        if let Some(description) = &self.description {
            task.description.clone_from(description);
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(dependency) = &self.dependency {
            task.dependency = Some(dependency.clone());
        }
    }

    fn into_new_task(self) -> Result<Task, ToolError> {
        let description = self.description.ok_or_else(|| {
            ToolError::InvalidArguments(format!("task {:?} needs a description", self.id))
        })?;
        Ok(Task {
            id: self.id,
            description,
            status: self.status.unwrap_or_default(),
            dependency: self.dependency,
        })
    }
}

/// Per-conversation task lists. Every change is published in full on a
/// broadcast channel.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<Mutex<HashMap<ConversationId, Vec<Task>>>>,
    updates: broadcast::Sender<TaskListUpdate>,
}

impl TaskStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskListUpdate> {
        self.updates.subscribe()
    }

    pub async fn tasks(&self, conversation_id: ConversationId) -> Vec<Task> {
        let guard = self.inner.lock().await;
        guard.get(&conversation_id).cloned().unwrap_or_default()
    }

    /// Replace the whole list. An empty list clears it.
    pub async fn create(&self, conversation_id: ConversationId, tasks: Vec<Task>) -> Vec<Task> {
        let mut guard = self.inner.lock().await;
        if tasks.is_empty() {
            guard.remove(&conversation_id);
        } else {
            guard.insert(conversation_id, tasks.clone());
        }
        self.publish(conversation_id, &tasks);
        tasks
    }

    /// Merge patches over known ids and append unknown ids in the order
    /// given. Nothing changes if any patch is rejected.
    pub async fn update(
        &self,
        conversation_id: ConversationId,
        patches: Vec<TaskPatch>,
    ) -> Result<Vec<Task>, ToolError> {
        let mut guard = self.inner.lock().await;
        let mut tasks = guard.get(&conversation_id).cloned().unwrap_or_default();

        for patch in patches {
            match tasks.iter_mut().find(|t| t.id == patch.id) {
                Some(existing) => patch.apply_to(existing),
                None => tasks.push(patch.into_new_task()?),
            }
        }

        guard.insert(conversation_id, tasks.clone());
        self.publish(conversation_id, &tasks);
        Ok(tasks)
    }

    pub async fn clear(&self, conversation_id: ConversationId) {
        let mut guard = self.inner.lock().await;
        guard.remove(&conversation_id);
        self.publish(conversation_id, &[]);
    }

    fn publish(&self, conversation_id: ConversationId, tasks: &[Task]) {
        let update = TaskListUpdate {
            conversation_id,
            tasks: tasks.to_vec(),
        };
        if self.updates.send(update).is_err() {
            tracing::debug!(%conversation_id, "no task list subscribers");
        }
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}
