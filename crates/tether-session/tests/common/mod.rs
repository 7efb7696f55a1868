#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tether_core::errors::TransportError;
use tether_core::events::SessionEvent;
use tether_core::ids::ConversationId;
use tether_core::messages::{Attachment, ComponentSelection, Message};
use tether_core::transport::{
    ModelTransport, ToolCallFragment, ToolOutcome, TransportEvent, TransportStream, TurnEnd, TurnRequest,
};
use tether_engine::ToolRegistry;
use tether_session::{
    CacheScope, ConsentDecision, FixedConsent, SessionConfig, SessionController, SessionDeps,
    SettledCallback, TurnHooks,
};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

enum Script {
    Live(mpsc::UnboundedReceiver<TransportEvent>),
    Fail(TransportError),
}

pub struct RecordedRequest {
    pub conversation_id: ConversationId,
    pub prompt: String,
    pub redo: bool,
    pub attachments: Vec<Attachment>,
    pub selections: Vec<ComponentSelection>,
    tool_results: Option<mpsc::UnboundedReceiver<ToolOutcome>>,
}

/// Transport that replays one script per `stream` call, in push order.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    /// Canned turn: the events are delivered and then the stream closes.
    pub fn push_events(&self, events: Vec<TransportEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        for event in events {
            tx.send(event).unwrap();
        }
        self.scripts.lock().push_back(Script::Live(rx));
    }

    /// Turn fed by the test; it stays open until the sender sends a
    /// terminal event or is dropped.
    pub fn push_live(&self) -> mpsc::UnboundedSender<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(Script::Live(rx));
        tx
    }

    pub fn push_failure(&self, error: TransportError) {
        self.scripts.lock().push_back(Script::Fail(error));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests.lock().iter().map(|r| r.prompt.clone()).collect()
    }

    pub fn with_request<R>(&self, index: usize, f: impl FnOnce(&RecordedRequest) -> R) -> R {
        f(&self.requests.lock()[index])
    }

    /// Everything the controller sent back for the given request.
    pub fn drain_tool_results(&self, index: usize) -> Vec<ToolOutcome> {
        let mut rx = self.requests.lock()[index]
            .tool_results
            .take()
            .expect("results already taken");
        let mut out = Vec::new();
        while let Ok(outcome) = rx.try_recv() {
            out.push(outcome);
        }
        out
    }
}

#[async_trait]
impl ModelTransport for ScriptedTransport {
    async fn stream(&self, request: TurnRequest) -> Result<TransportStream, TransportError> {
        self.requests.lock().push(RecordedRequest {
            conversation_id: request.conversation_id,
            prompt: request.prompt,
            redo: request.redo,
            attachments: request.attachments,
            selections: request.selections,
            tool_results: Some(request.tool_results),
        });

        let script = self
            .scripts
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Unavailable("no scripted turn left".into()))?;
        match script {
            Script::Live(rx) => Ok(Box::pin(UnboundedReceiverStream::new(rx))),
            Script::Fail(error) => Err(error),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HookCall {
    FilesUpdated,
    CheckProblems,
    ExtraFiles(Vec<PathBuf>, Option<String>),
    Invalidate(CacheScope),
}

#[derive(Default)]
pub struct RecordingHooks {
    calls: Mutex<Vec<HookCall>>,
}

impl RecordingHooks {
    pub fn calls(&self) -> Vec<HookCall> {
        self.calls.lock().clone()
    }
}

impl TurnHooks for RecordingHooks {
    fn files_updated(&self, _conversation_id: ConversationId) {
        self.calls.lock().push(HookCall::FilesUpdated);
    }

    fn check_problems(&self, _conversation_id: ConversationId) {
        self.calls.lock().push(HookCall::CheckProblems);
    }

    fn extra_files(&self, _conversation_id: ConversationId, files: &[PathBuf], error: Option<&str>) {
        self.calls
            .lock()
            .push(HookCall::ExtraFiles(files.to_vec(), error.map(str::to_owned)));
    }

    fn invalidate(&self, _conversation_id: ConversationId, scope: CacheScope) {
        self.calls.lock().push(HookCall::Invalidate(scope));
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub transport: Arc<ScriptedTransport>,
    pub hooks: Arc<RecordingHooks>,
    pub events: broadcast::Receiver<SessionEvent>,
    pub project: PathBuf,
    _dir: tempfile::TempDir,
}

pub struct HarnessOptions {
    pub registry: ToolRegistry,
    pub consent: ConsentDecision,
    pub auto_fix_problems: bool,
    /// Replaces the recording hooks handed to the controller.
    pub hooks: Option<Arc<dyn TurnHooks>>,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            registry: ToolRegistry::new(),
            consent: ConsentDecision::Accept,
            auto_fix_problems: false,
            hooks: None,
        }
    }
}

pub fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

pub fn harness_with(options: HarnessOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("app");
    std::fs::create_dir_all(&project).unwrap();

    let transport = Arc::new(ScriptedTransport::default());
    let hooks = Arc::new(RecordingHooks::default());
    let controller = SessionController::new(SessionDeps {
        transport: transport.clone(),
        registry: Arc::new(options.registry),
        consent: Arc::new(FixedConsent(options.consent)),
        hooks: options.hooks.unwrap_or_else(|| hooks.clone() as Arc<dyn TurnHooks>),
        config: SessionConfig {
            default_project_root: project.clone(),
            auto_fix_problems: options.auto_fix_problems,
        },
    });
    let events = controller.subscribe();

    Harness {
        controller,
        transport,
        hooks,
        events,
        project,
        _dir: dir,
    }
}

impl Harness {
    pub fn project(&self) -> &Path {
        &self.project
    }

    /// Wait for the next `TurnEnded` of `conversation_id` and return its
    /// error. Other events are skipped.
    pub async fn turn_ended(&mut self, conversation_id: ConversationId) -> Option<String> {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Ok(SessionEvent::TurnEnded {
                        conversation_id: id,
                        error,
                        ..
                    }) if id == conversation_id => return error,
                    Ok(_) => continue,
                    Err(e) => panic!("event stream broke: {e}"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("timed out waiting for turn end")
    }

    /// Collect events until the next `TurnEnded` of `conversation_id`,
    /// inclusive.
    pub async fn events_until_end(&mut self, conversation_id: ConversationId) -> Vec<SessionEvent> {
        let collect = async {
            let mut seen = Vec::new();
            loop {
                let event = self.events.recv().await.expect("event stream broke");
                let done = matches!(
                    &event,
                    SessionEvent::TurnEnded { conversation_id: id, .. } if *id == conversation_id
                );
                seen.push(event);
                if done {
                    return seen;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), collect)
            .await
            .expect("timed out collecting events")
    }
}

/// A settled callback plus a counter of how often it ran.
pub fn settled_counter() -> (Arc<AtomicUsize>, SettledCallback) {
    let count = Arc::new(AtomicUsize::new(0));
    let inner = count.clone();
    let callback: SettledCallback = Box::new(move || {
        inner.fetch_add(1, Ordering::SeqCst);
    });
    (count, callback)
}

pub fn messages(reply: &str) -> TransportEvent {
    TransportEvent::Messages(vec![Message::user("prompt"), Message::assistant(reply)])
}

pub fn end() -> TransportEvent {
    TransportEvent::End(TurnEnd::default())
}

pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value, is_complete: bool) -> TransportEvent {
    TransportEvent::ToolCall(ToolCallFragment {
        tool_call_id: tether_core::ids::ToolCallId::from_raw(id),
        tool_name: name.to_string(),
        arguments,
        is_complete,
    })
}

/// Poll until `check` holds or a couple of seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
