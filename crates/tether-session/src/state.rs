use std::path::PathBuf;

use tether_core::ids::{ConversationId, TurnId};
use tether_core::messages::{Attachment, ComponentSelection, Message, QueuedMessage};

/// A request to start a turn.
#[derive(Clone, Debug)]
pub struct StartRequest {
    pub conversation_id: ConversationId,
    pub prompt: String,
    pub redo: bool,
    pub attachments: Vec<Attachment>,
    pub selections: Vec<ComponentSelection>,
    /// Project the tools operate on. When `None` the conversation's last
    /// project is reused, falling back to the configured default.
    pub project_root: Option<PathBuf>,
}

impl StartRequest {
    pub fn new(conversation_id: ConversationId, prompt: impl Into<String>) -> Self {
        Self {
            conversation_id,
            prompt: prompt.into(),
            redo: false,
            attachments: Vec::new(),
            selections: Vec::new(),
            project_root: None,
        }
    }

    pub fn from_queued(conversation_id: ConversationId, message: QueuedMessage) -> Self {
        Self {
            conversation_id,
            prompt: message.prompt,
            redo: false,
            attachments: message.attachments,
            selections: message.selections,
            project_root: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.prompt.trim().is_empty() && self.attachments.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    EmptyPrompt,
    AlreadyActive,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    Started(TurnId),
    Rejected(RejectReason),
}

impl StartOutcome {
    pub fn turn_id(&self) -> Option<&TurnId> {
        match self {
            Self::Started(id) => Some(id),
            Self::Rejected(_) => None,
        }
    }
}

/// Observable state of one conversation.
#[derive(Clone, Debug, Default)]
pub struct ConversationState {
    pub is_active: bool,
    pub last_error: Option<String>,
    /// Number of turns that produced at least one update. Never decreases.
    pub stream_count: u64,
    pub messages: Vec<Message>,
    pub(crate) project_root: Option<PathBuf>,
}

impl ConversationState {
    /// Whether a queued message may be started now.
    pub(crate) fn can_drain(&self) -> bool {
        !self.is_active && self.last_error.is_none()
    }
}
