use serde::{Deserialize, Serialize};

use crate::ids::{ConversationId, ToolCallId, TurnId};
use crate::messages::Message;
use crate::tasks::Task;

/// Events published by the session controller for the rendering surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// First update of a turn. `stream_count` only ever grows.
    StreamStarted {
        conversation_id: ConversationId,
        turn_id: TurnId,
        stream_count: u64,
    },

    MessagesUpdated {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },

    ToolMarkup {
        conversation_id: ConversationId,
        tool_call_id: ToolCallId,
        tool_name: String,
        markup: String,
        is_complete: bool,
    },

    ToolResult {
        conversation_id: ConversationId,
        tool_call_id: ToolCallId,
        tool_name: String,
        content: String,
        is_error: bool,
    },

    TasksUpdated {
        conversation_id: ConversationId,
        tasks: Vec<Task>,
    },

    TurnEnded {
        conversation_id: ConversationId,
        turn_id: TurnId,
        error: Option<String>,
    },

    QueueRejected {
        conversation_id: ConversationId,
    },
}

impl SessionEvent {
    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::StreamStarted { conversation_id, .. }
            | Self::MessagesUpdated { conversation_id, .. }
            | Self::ToolMarkup { conversation_id, .. }
            | Self::ToolResult { conversation_id, .. }
            | Self::TasksUpdated { conversation_id, .. }
            | Self::TurnEnded { conversation_id, .. }
            | Self::QueueRejected { conversation_id } => *conversation_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StreamStarted { .. } => "stream_started",
            Self::MessagesUpdated { .. } => "messages_updated",
            Self::ToolMarkup { .. } => "tool_markup",
            Self::ToolResult { .. } => "tool_result",
            Self::TasksUpdated { .. } => "tasks_updated",
            Self::TurnEnded { .. } => "turn_ended",
            Self::QueueRejected { .. } => "queue_rejected",
        }
    }
}
