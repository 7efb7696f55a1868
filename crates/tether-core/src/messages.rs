use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::MessageId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the assembled conversation, as republished on every update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// What the user wants done with an uploaded file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentIntent {
    #[default]
    ChatContext,
    UploadToCodebase,
}

/// A file uploaded alongside a prompt. `path` points into the temp
/// attachments directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    pub path: PathBuf,
    #[serde(default)]
    pub intent: AttachmentIntent,
}

/// A UI component the user selected in the preview before prompting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSelection {
    pub id: String,
    pub name: String,
    pub relative_path: String,
    pub line_number: u32,
    pub column_number: u32,
}

/// A follow-up message held back until the active turn finishes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub prompt: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub selections: Vec<ComponentSelection>,
}

impl QueuedMessage {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            attachments: Vec::new(),
            selections: Vec::new(),
        }
    }
}
