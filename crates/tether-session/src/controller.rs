use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use tether_core::errors::TransportError;
use tether_core::events::SessionEvent;
use tether_core::ids::{ConversationId, ToolCallId, TurnId};
use tether_core::messages::{Message, QueuedMessage};
use tether_core::tasks::TaskListUpdate;
use tether_core::tools::{ConsentPolicy, ToolContext, ToolError, ToolOutput};
use tether_core::transport::{
    ModelTransport, ToolCallFragment, ToolOutcome, TransportEvent, TurnEnd, TurnRequest,
};
use tether_engine::ToolRegistry;
use tether_settings::TetherSettings;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::consent::{ConsentDecision, ConsentGate, ConsentRequest};
use crate::hooks::{CacheScope, TurnHooks};
use crate::state::{ConversationState, RejectReason, StartOutcome, StartRequest};

const EVENT_CHANNEL_CAPACITY: usize = 1024;
const UNTERMINATED_STREAM: &str = "stream ended without a terminal event";

/// Invoked once when a start request has been dealt with: after the turn
/// ends or fails, or right away when the request is a duplicate.
pub type SettledCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Project used when neither the request nor an earlier turn named one.
    pub default_project_root: PathBuf,
    pub auto_fix_problems: bool,
}

impl SessionConfig {
    pub fn from_settings(settings: &TetherSettings, default_project_root: impl Into<PathBuf>) -> Self {
        Self {
            default_project_root: default_project_root.into(),
            auto_fix_problems: settings.chat.auto_fix_problems,
        }
    }
}

/// Collaborators injected into the controller.
pub struct SessionDeps {
    pub transport: Arc<dyn ModelTransport>,
    pub registry: Arc<ToolRegistry>,
    pub consent: Arc<dyn ConsentGate>,
    pub hooks: Arc<dyn TurnHooks>,
    pub config: SessionConfig,
}

struct TurnClaim {
    turn_id: TurnId,
    started_at: Instant,
}

struct ActiveTurn {
    conversation_id: ConversationId,
    turn_id: TurnId,
    project_root: PathBuf,
    cancel: CancellationToken,
}

enum TurnOutcome {
    Ended(TurnEnd),
    Failed(String),
}

/// Runs model turns per conversation.
///
/// At most one turn per conversation is in flight. Each turn is driven by
/// its own task, which applies transport events in order, executes
/// completed tool calls and publishes [`SessionEvent`]s.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn ModelTransport>,
    registry: Arc<ToolRegistry>,
    consent: Arc<dyn ConsentGate>,
    hooks: Arc<dyn TurnHooks>,
    config: SessionConfig,
    events: broadcast::Sender<SessionEvent>,
    claims: DashMap<ConversationId, TurnClaim>,
    conversations: DashMap<ConversationId, ConversationState>,
    queue: DashMap<ConversationId, QueuedMessage>,
    shutdown: CancellationToken,
}

impl SessionController {
    pub fn new(deps: SessionDeps) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                transport: deps.transport,
                registry: deps.registry,
                consent: deps.consent,
                hooks: deps.hooks,
                config: deps.config,
                events,
                claims: DashMap::new(),
                conversations: DashMap::new(),
                queue: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.inner.registry
    }

    /// Re-publish task list changes as [`SessionEvent::TasksUpdated`] until
    /// the source closes or the controller shuts down.
    pub fn forward_task_updates(&self, mut updates: broadcast::Receiver<TaskListUpdate>) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let received = tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    received = updates.recv() => received,
                };
                match received {
                    Ok(update) => inner.emit(SessionEvent::TasksUpdated {
                        conversation_id: update.conversation_id,
                        tasks: update.tasks,
                    }),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "task update forwarder lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Start a turn for the request's conversation.
    ///
    /// A request with a blank prompt and no attachments is ignored and
    /// `on_settled` is dropped without being called. A request for a
    /// conversation that already has a turn in flight is ignored and
    /// `on_settled` runs immediately.
    pub fn start_turn(&self, request: StartRequest, on_settled: Option<SettledCallback>) -> StartOutcome {
        self.inner.start(request, on_settled)
    }

    /// Queue a follow-up message. Only one message may wait per
    /// conversation; a second one is refused and the first is kept.
    pub fn enqueue(&self, conversation_id: ConversationId, message: QueuedMessage) -> bool {
        let accepted = match self.inner.queue.entry(conversation_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(message);
                true
            }
        };

        if !accepted {
            warn!(
                %conversation_id,
                "a message is already queued, wait for it to be sent or clear it"
            );
            self.inner.emit(SessionEvent::QueueRejected { conversation_id });
            return false;
        }

        debug!(%conversation_id, "message queued");
        self.inner.try_drain(conversation_id);
        true
    }

    /// Take the waiting message out of the queue without sending it.
    pub fn dequeue(&self, conversation_id: ConversationId) -> Option<QueuedMessage> {
        self.inner.queue.remove(&conversation_id).map(|(_, message)| message)
    }

    /// Drop the waiting message, if any.
    pub fn clear_queue(&self, conversation_id: ConversationId) {
        self.inner.queue.remove(&conversation_id);
    }

    /// The waiting message, if any.
    pub fn queued(&self, conversation_id: ConversationId) -> Option<QueuedMessage> {
        self.inner.queue.get(&conversation_id).map(|entry| entry.clone())
    }

    /// Overwrite the conversation's error. Clearing it lets a waiting
    /// message go out.
    pub fn set_error(&self, conversation_id: ConversationId, error: Option<String>) {
        let cleared = error.is_none();
        self.inner.conversations.entry(conversation_id).or_default().last_error = error;
        if cleared {
            self.inner.try_drain(conversation_id);
        }
    }

    /// Dismiss the error; same as `set_error(conversation_id, None)`.
    pub fn clear_error(&self, conversation_id: ConversationId) {
        self.set_error(conversation_id, None);
    }

    /// Snapshot of the conversation's state.
    pub fn state(&self, conversation_id: ConversationId) -> ConversationState {
        self.inner
            .conversations
            .get(&conversation_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Whether a turn currently holds the conversation's claim.
    pub fn is_active(&self, conversation_id: ConversationId) -> bool {
        self.inner.claims.contains_key(&conversation_id)
    }

    /// Number of turns in flight across all conversations.
    pub fn active_turns(&self) -> usize {
        self.inner.claims.len()
    }

    /// Fail every turn in flight and stop forwarding task updates.
    pub fn shutdown(&self) {
        info!(active = self.inner.claims.len(), "session controller shutting down");
        self.inner.shutdown.cancel();
    }
}

impl Inner {
    fn start(self: &Arc<Self>, request: StartRequest, on_settled: Option<SettledCallback>) -> StartOutcome {
        let conversation_id = request.conversation_id;
        if request.is_empty() {
            debug!(%conversation_id, "ignoring start request with empty prompt");
            return StartOutcome::Rejected(RejectReason::EmptyPrompt);
        }

        let turn_id = TurnId::new();
        let claimed = match self.claims.entry(conversation_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(TurnClaim {
                    turn_id: turn_id.clone(),
                    started_at: Instant::now(),
                });
                true
            }
        };
        if !claimed {
            warn!(%conversation_id, "turn already active for conversation, ignoring start request");
            settle(on_settled);
            return StartOutcome::Rejected(RejectReason::AlreadyActive);
        }

        let project_root = {
            let mut state = self.conversations.entry(conversation_id).or_default();
            state.is_active = true;
            state.last_error = None;
            if let Some(root) = &request.project_root {
                state.project_root = Some(root.clone());
            }
            state
                .project_root
                .clone()
                .unwrap_or_else(|| self.config.default_project_root.clone())
        };

        info!(
            %conversation_id,
            %turn_id,
            redo = request.redo,
            attachments = request.attachments.len(),
            selections = request.selections.len(),
            "starting turn"
        );

        let turn = ActiveTurn {
            conversation_id,
            turn_id: turn_id.clone(),
            project_root,
            cancel: self.shutdown.child_token(),
        };
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = inner.drive(&turn, request).await;
            inner.finish(turn, outcome, on_settled);
        });

        StartOutcome::Started(turn_id)
    }

    #[instrument(skip_all, fields(conversation_id = %turn.conversation_id, turn_id = %turn.turn_id))]
    async fn drive(&self, turn: &ActiveTurn, request: StartRequest) -> TurnOutcome {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let turn_request = TurnRequest {
            conversation_id: turn.conversation_id,
            turn_id: turn.turn_id.clone(),
            prompt: request.prompt,
            redo: request.redo,
            attachments: request.attachments,
            selections: request.selections,
            tool_results: results_rx,
        };

        let mut stream = match self.transport.stream(turn_request).await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, kind = e.error_kind(), "transport dispatch failed");
                return TurnOutcome::Failed(e.to_string());
            }
        };

        let mut first_update = true;
        let mut executed: HashSet<ToolCallId> = HashSet::new();
        loop {
            let next = tokio::select! {
                _ = turn.cancel.cancelled() => {
                    return TurnOutcome::Failed(TransportError::Cancelled.to_string());
                }
                next = stream.next() => next,
            };
            let Some(event) = next else {
                warn!("{UNTERMINATED_STREAM}");
                return TurnOutcome::Failed(UNTERMINATED_STREAM.to_string());
            };

            match event {
                TransportEvent::Messages(messages) => {
                    self.on_messages(turn, messages, std::mem::take(&mut first_update));
                }
                TransportEvent::ToolCall(fragment) => {
                    self.on_tool_call(turn, fragment, &mut executed, &results_tx).await;
                }
                TransportEvent::End(end) => return TurnOutcome::Ended(end),
                TransportEvent::Error(message) => return TurnOutcome::Failed(message),
            }
        }
    }

    fn on_messages(&self, turn: &ActiveTurn, messages: Vec<Message>, first_update: bool) {
        let conversation_id = turn.conversation_id;
        let stream_count = {
            let mut state = self.conversations.entry(conversation_id).or_default();
            if first_update {
                state.stream_count += 1;
            }
            state.messages.clone_from(&messages);
            state.stream_count
        };

        if first_update {
            self.emit(SessionEvent::StreamStarted {
                conversation_id,
                turn_id: turn.turn_id.clone(),
                stream_count,
            });
        }
        self.emit(SessionEvent::MessagesUpdated {
            conversation_id,
            messages,
        });
    }

    async fn on_tool_call(
        &self,
        turn: &ActiveTurn,
        fragment: ToolCallFragment,
        executed: &mut HashSet<ToolCallId>,
        results: &mpsc::UnboundedSender<ToolOutcome>,
    ) {
        if !fragment.is_complete {
            if let Some(markup) = self.registry.render(&fragment) {
                self.emit_markup(turn.conversation_id, &fragment, markup);
            }
            return;
        }

        if !executed.insert(fragment.tool_call_id.clone()) {
            debug!(
                tool = %fragment.tool_name,
                tool_call_id = %fragment.tool_call_id,
                "tool call already executed in this turn"
            );
            return;
        }

        let (content, is_error, markup) = match self.run_tool(turn, &fragment).await {
            Ok(output) => {
                let markup = output.markup.or_else(|| self.registry.render(&fragment));
                (output.content, false, markup)
            }
            Err(e) => {
                warn!(tool = %fragment.tool_name, error = %e, "tool call failed");
                (e.to_string(), true, self.registry.render(&fragment))
            }
        };

        if let Some(markup) = markup {
            self.emit_markup(turn.conversation_id, &fragment, markup);
        }

        let outcome = ToolOutcome {
            tool_call_id: fragment.tool_call_id.clone(),
            tool_name: fragment.tool_name.clone(),
            content: content.clone(),
            is_error,
        };
        if results.send(outcome).is_err() {
            debug!(tool = %fragment.tool_name, "transport no longer reads tool results");
        }

        self.emit(SessionEvent::ToolResult {
            conversation_id: turn.conversation_id,
            tool_call_id: fragment.tool_call_id,
            tool_name: fragment.tool_name,
            content,
            is_error,
        });
    }

    async fn run_tool(&self, turn: &ActiveTurn, fragment: &ToolCallFragment) -> Result<ToolOutput, ToolError> {
        let name = fragment.tool_name.as_str();
        let tool = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = tool.validate(fragment.arguments.clone())?;

        match self.registry.consent_for(name).unwrap_or(ConsentPolicy::Ask) {
            ConsentPolicy::Always => {}
            ConsentPolicy::Never => return Err(ToolError::ConsentDeclined(name.to_string())),
            ConsentPolicy::Ask => {
                let request = ConsentRequest {
                    conversation_id: turn.conversation_id,
                    tool_call_id: fragment.tool_call_id.clone(),
                    tool_name: name.to_string(),
                    preview: args.consent_preview().map(str::to_owned),
                    arguments: fragment.arguments.clone(),
                };
                match self.consent.request(request).await {
                    ConsentDecision::Accept => {}
                    ConsentDecision::AcceptAlways => {
                        info!(tool = name, "tool allowed without prompting from now on");
                        self.registry.allow_always(name);
                    }
                    ConsentDecision::Decline => {
                        return Err(ToolError::ConsentDeclined(name.to_string()));
                    }
                }
            }
        }

        let ctx = ToolContext {
            conversation_id: turn.conversation_id,
            tool_call_id: fragment.tool_call_id.clone(),
            project_root: turn.project_root.clone(),
            cancellation: turn.cancel.child_token(),
        };
        debug!(tool = name, tool_call_id = %fragment.tool_call_id, "executing tool");
        tool.execute_validated(args, &ctx).await
    }

    fn finish(self: &Arc<Self>, turn: ActiveTurn, outcome: TurnOutcome, on_settled: Option<SettledCallback>) {
        let conversation_id = turn.conversation_id;
        let (end, error) = match outcome {
            TurnOutcome::Ended(end) => (Some(end), None),
            TurnOutcome::Failed(message) => {
                warn!(%conversation_id, turn_id = %turn.turn_id, error = %message, "turn failed");
                (None, Some(message))
            }
        };

        // Must happen before the claim is released; after that the state
        // belongs to the next turn.
        {
            let mut state = self.conversations.entry(conversation_id).or_default();
            state.is_active = false;
            if let Some(message) = &error {
                state.last_error = Some(message.clone());
            }
        }

        if let Some((_, claim)) = self
            .claims
            .remove_if(&conversation_id, |_, claim| claim.turn_id == turn.turn_id)
        {
            debug!(
                %conversation_id,
                elapsed_ms = claim.started_at.elapsed().as_millis() as u64,
                "turn claim released"
            );
        }

        if let Some(end) = &end {
            self.apply_turn_end(conversation_id, end);
        }
        for scope in [
            CacheScope::ChatList,
            CacheScope::App,
            CacheScope::Versions,
            CacheScope::TokenCount,
        ] {
            self.hooks.invalidate(conversation_id, scope);
        }

        settle(on_settled);
        if error.is_none() {
            info!(%conversation_id, turn_id = %turn.turn_id, "turn ended");
        }
        self.emit(SessionEvent::TurnEnded {
            conversation_id,
            turn_id: turn.turn_id,
            error,
        });

        self.try_drain(conversation_id);
    }

    fn apply_turn_end(&self, conversation_id: ConversationId, end: &TurnEnd) {
        if end.updated_files {
            self.hooks.files_updated(conversation_id);
            if self.config.auto_fix_problems {
                self.hooks.check_problems(conversation_id);
            }
        }
        if !end.extra_files.is_empty() || end.extra_files_error.is_some() {
            self.hooks.extra_files(
                conversation_id,
                &end.extra_files,
                end.extra_files_error.as_deref(),
            );
        }
        self.hooks.invalidate(conversation_id, CacheScope::Proposal);
        self.hooks.invalidate(conversation_id, CacheScope::Budget);
    }

    /// Send the queued message if the conversation is idle and error-free.
    /// The message leaves the queue before its turn starts.
    fn try_drain(self: &Arc<Self>, conversation_id: ConversationId) {
        if self.claims.contains_key(&conversation_id) {
            return;
        }
        let ready = self
            .conversations
            .get(&conversation_id)
            .map_or(true, |state| state.can_drain());
        if !ready {
            return;
        }
        let Some((_, message)) = self.queue.remove(&conversation_id) else {
            return;
        };

        info!(%conversation_id, "sending queued message");
        match self.start(StartRequest::from_queued(conversation_id, message.clone()), None) {
            StartOutcome::Started(_) => {}
            StartOutcome::Rejected(RejectReason::AlreadyActive) => {
                // Lost to a direct start; the next drain picks it up.
                self.queue.entry(conversation_id).or_insert(message);
            }
            StartOutcome::Rejected(RejectReason::EmptyPrompt) => {
                warn!(%conversation_id, "dropping empty queued message");
            }
        }
    }

    fn emit_markup(&self, conversation_id: ConversationId, fragment: &ToolCallFragment, markup: String) {
        self.emit(SessionEvent::ToolMarkup {
            conversation_id,
            tool_call_id: fragment.tool_call_id.clone(),
            tool_name: fragment.tool_name.clone(),
            markup,
            is_complete: fragment.is_complete,
        });
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("no session event receivers");
        }
    }
}

fn settle(on_settled: Option<SettledCallback>) {
    if let Some(callback) = on_settled {
        callback();
    }
}
