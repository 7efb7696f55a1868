use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::errors::TransportError;
use crate::ids::{ConversationId, ToolCallId, TurnId};
use crate::messages::{Attachment, ComponentSelection, Message};

/// Arguments of one tool invocation as streamed so far.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    /// Grows with every fragment; may be missing fields until `is_complete`.
    pub arguments: serde_json::Value,
    pub is_complete: bool,
}

/// Result of a tool call, sent back to the transport so the model can react.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    pub content: String,
    pub is_error: bool,
}

/// Payload of a successful turn end.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnEnd {
    pub updated_files: bool,
    #[serde(default)]
    pub extra_files: Vec<PathBuf>,
    #[serde(default)]
    pub extra_files_error: Option<String>,
}

/// Events of a single turn. Ordering contract:
///
/// (Messages | ToolCall)* → (End | Error)
///
/// Nothing after the terminal event is read.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// The full assembled message list for the conversation.
    Messages(Vec<Message>),
    ToolCall(ToolCallFragment),
    End(TurnEnd),
    Error(String),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End(_) | Self::Error(_))
    }
}

/// Everything the transport needs to run one turn.
#[derive(Debug)]
pub struct TurnRequest {
    pub conversation_id: ConversationId,
    pub turn_id: TurnId,
    pub prompt: String,
    pub redo: bool,
    pub attachments: Vec<Attachment>,
    pub selections: Vec<ComponentSelection>,
    /// Results of executed tool calls, in execution order. The transport
    /// feeds them back to the model.
    pub tool_results: mpsc::UnboundedReceiver<ToolOutcome>,
}

pub type TransportStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// The model side of a turn. Request construction, provider selection and
/// token accounting live behind this trait.
#[async_trait]
pub trait ModelTransport: Send + Sync {
    async fn stream(&self, request: TurnRequest) -> Result<TransportStream, TransportError>;
}
