mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{end, harness_with, tool_call, Harness, HarnessOptions};
use serde::Deserialize;
use serde_json::json;
use tether_core::events::SessionEvent;
use tether_core::ids::ConversationId;
use tether_core::tools::{ConsentPolicy, Tool, ToolContext, ToolError, ToolOutput};
use tether_engine::{create_default_registry, RegistryDeps, TaskStore, ToolRegistry};
use tether_session::{ConsentDecision, StartRequest};
use tether_settings::TetherSettings;

const CONV: ConversationId = ConversationId::new(3);

#[derive(Deserialize)]
struct ProbeArgs {
    text: String,
}

#[derive(Deserialize, Default)]
struct ProbePartial {
    text: Option<String>,
}

struct ProbeTool {
    consent: ConsentPolicy,
    runs: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for ProbeTool {
    type Args = ProbeArgs;
    type Partial = ProbePartial;

    fn name(&self) -> &str {
        "probe"
    }

    fn description(&self) -> &str {
        "Echoes its input"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}})
    }

    fn default_consent(&self) -> ConsentPolicy {
        self.consent
    }

    fn consent_preview(&self, args: &ProbeArgs) -> Option<String> {
        Some(format!("Echo {}", args.text))
    }

    fn render(&self, partial: &ProbePartial, is_complete: bool) -> Option<String> {
        Some(format!(
            "<probe text=\"{}\" done=\"{is_complete}\"></probe>",
            partial.text.as_deref().unwrap_or_default()
        ))
    }

    async fn execute(&self, args: ProbeArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        if args.text == "fail" {
            return Err(ToolError::ExecutionFailed("probe refused".into()));
        }
        Ok(ToolOutput::text(format!("echo: {}", args.text)))
    }
}

fn probe_harness(consent: ConsentPolicy, decision: ConsentDecision) -> (Harness, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let mut registry = ToolRegistry::new();
    registry
        .register(Arc::new(ProbeTool {
            consent,
            runs: runs.clone(),
        }))
        .unwrap();
    let h = harness_with(HarnessOptions {
        registry,
        consent: decision,
        ..HarnessOptions::default()
    });
    (h, runs)
}

struct Observed {
    markup: Vec<(String, bool)>,
    results: Vec<(String, bool)>,
}

fn observe(events: &[SessionEvent]) -> Observed {
    let mut observed = Observed {
        markup: Vec::new(),
        results: Vec::new(),
    };
    for event in events {
        match event {
            SessionEvent::ToolMarkup {
                markup, is_complete, ..
            } => observed.markup.push((markup.clone(), *is_complete)),
            SessionEvent::ToolResult {
                content, is_error, ..
            } => observed.results.push((content.clone(), *is_error)),
            _ => {}
        }
    }
    observed
}

#[tokio::test]
async fn partial_fragments_render_and_completion_executes_once() {
    let (mut h, runs) = probe_harness(ConsentPolicy::Always, ConsentDecision::Decline);
    h.transport.push_events(vec![
        tool_call("call-1", "probe", json!({}), false),
        tool_call("call-1", "probe", json!({"text": "he"}), false),
        tool_call("call-1", "probe", json!({"text": "hello"}), true),
        tool_call("call-1", "probe", json!({"text": "hello"}), true),
        end(),
    ]);

    h.controller.start_turn(StartRequest::new(CONV, "go"), None);
    let events = h.events_until_end(CONV).await;
    let observed = observe(&events);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        observed.markup,
        vec![
            ("<probe text=\"\" done=\"false\"></probe>".to_string(), false),
            ("<probe text=\"he\" done=\"false\"></probe>".to_string(), false),
            ("<probe text=\"hello\" done=\"true\"></probe>".to_string(), true),
        ]
    );
    assert_eq!(observed.results, vec![("echo: hello".to_string(), false)]);

    let sent = h.transport.drain_tool_results(0);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].tool_call_id.as_str(), "call-1");
    assert_eq!(sent[0].content, "echo: hello");
    assert!(!sent[0].is_error);
}

#[tokio::test]
async fn failures_go_back_as_error_results() {
    let (mut h, runs) = probe_harness(ConsentPolicy::Always, ConsentDecision::Accept);
    h.transport.push_events(vec![
        tool_call("a", "nope", json!({}), false),
        tool_call("a", "nope", json!({}), true),
        tool_call("b", "probe", json!({"text": 5}), true),
        tool_call("c", "probe", json!({"text": "fail"}), true),
        tool_call("d", "probe", json!({"text": "still here"}), true),
        end(),
    ]);

    h.controller.start_turn(StartRequest::new(CONV, "go"), None);
    let events = h.events_until_end(CONV).await;
    let observed = observe(&events);

    assert_eq!(observed.results.len(), 4);
    assert_eq!(observed.results[0], ("unknown tool: nope".to_string(), true));
    assert!(observed.results[1].0.starts_with("invalid arguments: "));
    assert!(observed.results[1].1);
    assert_eq!(
        observed.results[2],
        ("execution failed: probe refused".to_string(), true)
    );
    assert_eq!(observed.results[3], ("echo: still here".to_string(), false));
    assert_eq!(runs.load(Ordering::SeqCst), 2);

    match events.last() {
        Some(SessionEvent::TurnEnded { error, .. }) => assert!(error.is_none()),
        other => panic!("expected turn end, got {other:?}"),
    }
    assert_eq!(h.transport.drain_tool_results(0).len(), 4);
}

#[tokio::test]
async fn never_policy_declines_without_running() {
    let (mut h, runs) = probe_harness(ConsentPolicy::Never, ConsentDecision::Accept);
    h.transport.push_events(vec![
        tool_call("x", "probe", json!({"text": "hi"}), true),
        end(),
    ]);

    h.controller.start_turn(StartRequest::new(CONV, "go"), None);
    let observed = observe(&h.events_until_end(CONV).await);

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        observed.results,
        vec![("user declined to run probe".to_string(), true)]
    );
}

#[tokio::test]
async fn ask_policy_declined_by_gate() {
    let (mut h, runs) = probe_harness(ConsentPolicy::Ask, ConsentDecision::Decline);
    h.transport.push_events(vec![
        tool_call("x", "probe", json!({"text": "hi"}), true),
        end(),
    ]);

    h.controller.start_turn(StartRequest::new(CONV, "go"), None);
    let observed = observe(&h.events_until_end(CONV).await);

    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(observed.results[0].1);
    assert_eq!(h.controller.registry().consent_for("probe"), Some(ConsentPolicy::Ask));
}

#[tokio::test]
async fn ask_policy_accepted_once_keeps_asking() {
    let (mut h, runs) = probe_harness(ConsentPolicy::Ask, ConsentDecision::Accept);
    h.transport.push_events(vec![
        tool_call("x", "probe", json!({"text": "hi"}), true),
        end(),
    ]);

    h.controller.start_turn(StartRequest::new(CONV, "go"), None);
    let observed = observe(&h.events_until_end(CONV).await);

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(observed.results, vec![("echo: hi".to_string(), false)]);
    assert_eq!(h.controller.registry().consent_for("probe"), Some(ConsentPolicy::Ask));
}

#[tokio::test]
async fn accept_always_stops_later_prompts() {
    let (mut h, runs) = probe_harness(ConsentPolicy::Ask, ConsentDecision::AcceptAlways);
    h.transport.push_events(vec![
        tool_call("x", "probe", json!({"text": "hi"}), true),
        end(),
    ]);

    h.controller.start_turn(StartRequest::new(CONV, "go"), None);
    h.turn_ended(CONV).await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.controller.registry().consent_for("probe"),
        Some(ConsentPolicy::Always)
    );
}

#[tokio::test]
async fn builtin_tools_run_through_the_controller() {
    let dir = tempfile::tempdir().unwrap();
    let attachments = dir.path().join("tether-attachments");
    let project = dir.path().join("site");
    std::fs::create_dir_all(&attachments).unwrap();
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(attachments.join("logo.svg"), "<svg/>").unwrap();

    let store = TaskStore::new();
    let mut settings = TetherSettings::default();
    settings.attachments.temp_dir = attachments.clone();
    let registry = create_default_registry(RegistryDeps::from_settings(&settings, store.clone())).unwrap();

    let mut h = harness_with(HarnessOptions {
        registry,
        ..HarnessOptions::default()
    });
    let forwarder = h.controller.forward_task_updates(store.subscribe());

    h.transport.push_events(vec![
        tool_call(
            "todo-1",
            "todo_write",
            json!({"action": "create", "todos": [
                {"id": "logo", "description": "Add the logo", "status": "in_progress"},
                {"id": "nav", "description": "Link it in the nav", "status": "pending", "dependency": "logo"}
            ]}),
            true,
        ),
        tool_call(
            "copy-1",
            "copy_file",
            json!({
                "source": attachments.join("logo.svg").to_string_lossy(),
                "destination": "public/logo.svg"
            }),
            true,
        ),
        end(),
    ]);

    let mut request = StartRequest::new(CONV, "add my logo");
    request.project_root = Some(project.clone());
    h.controller.start_turn(request, None);
    let mut events = h.events_until_end(CONV).await;

    if !events
        .iter()
        .any(|e| matches!(e, SessionEvent::TasksUpdated { .. }))
    {
        let late = tokio::time::timeout(Duration::from_secs(3), h.events.recv())
            .await
            .unwrap()
            .unwrap();
        events.push(late);
    }

    let tasks = events
        .iter()
        .find_map(|e| match e {
            SessionEvent::TasksUpdated {
                conversation_id,
                tasks,
            } if *conversation_id == CONV => Some(tasks.clone()),
            _ => None,
        })
        .expect("task update forwarded");
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[1].dependency.as_deref(), Some("logo"));

    let observed = observe(&events);
    assert!(observed
        .markup
        .iter()
        .any(|(m, done)| *done && m.starts_with("<tether-todo count=\"2\">")));
    assert_eq!(
        observed.results,
        vec![
            ("Created 2 todo(s)".to_string(), false),
            (
                "Successfully copied attachment to public/logo.svg".to_string(),
                false
            ),
        ]
    );
    assert_eq!(
        std::fs::read_to_string(project.join("public/logo.svg")).unwrap(),
        "<svg/>"
    );

    h.controller.shutdown();
    tokio::time::timeout(Duration::from_secs(3), forwarder)
        .await
        .unwrap()
        .unwrap();
}
