use std::path::PathBuf;

use tether_core::ids::ConversationId;

/// Cached views the host refetches after a turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheScope {
    ChatList,
    App,
    Versions,
    TokenCount,
    Proposal,
    Budget,
}

/// Side effects the host wants after a turn finishes. Every method defaults
/// to doing nothing. Implementations must not block; spawn if the work is
/// slow.
pub trait TurnHooks: Send + Sync {
    /// The turn wrote project files; the preview should reload.
    fn files_updated(&self, _conversation_id: ConversationId) {}

    /// Run the project's problem check. Only called when auto-fix is on.
    fn check_problems(&self, _conversation_id: ConversationId) {}

    fn extra_files(&self, _conversation_id: ConversationId, _files: &[PathBuf], _error: Option<&str>) {}

    fn invalidate(&self, _conversation_id: ConversationId, _scope: CacheScope) {}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl TurnHooks for NoopHooks {}
