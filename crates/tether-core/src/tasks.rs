use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
        }
    }
}

/// One entry of a conversation's task list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    /// Id of a task this one waits on. Informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status,
            dependency: None,
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependency = Some(id.into());
        self
    }
}

/// Full task list of a conversation after a change. Never a delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskListUpdate {
    pub conversation_id: ConversationId,
    pub tasks: Vec<Task>,
}
