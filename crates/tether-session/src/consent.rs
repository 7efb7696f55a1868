use async_trait::async_trait;
use tether_core::ids::{ConversationId, ToolCallId};

/// A pending `ask` decision, shown to the user.
#[derive(Clone, Debug)]
pub struct ConsentRequest {
    pub conversation_id: ConversationId,
    pub tool_call_id: ToolCallId,
    pub tool_name: String,
    /// Short human-readable summary of what the call will do, if the tool
    /// provides one.
    pub preview: Option<String>,
    pub arguments: serde_json::Value,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsentDecision {
    Accept,
    /// Accept, and stop asking for this tool for the rest of the process.
    AcceptAlways,
    Decline,
}

/// Decides whether a tool with an `ask` policy may run.
#[async_trait]
pub trait ConsentGate: Send + Sync {
    async fn request(&self, request: ConsentRequest) -> ConsentDecision;
}

/// Answers every request the same way. Used by headless callers.
#[derive(Clone, Copy, Debug)]
pub struct FixedConsent(pub ConsentDecision);

#[async_trait]
impl ConsentGate for FixedConsent {
    async fn request(&self, request: ConsentRequest) -> ConsentDecision {
        tracing::debug!(
            tool = %request.tool_name,
            decision = ?self.0,
            "answering consent request without prompting"
        );
        self.0
    }
}
