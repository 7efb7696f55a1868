mod common;

use std::path::PathBuf;
use std::time::Duration;

use common::{end, eventually, harness};
use tether_core::events::SessionEvent;
use tether_core::ids::ConversationId;
use tether_core::messages::{Attachment, AttachmentIntent, ComponentSelection, QueuedMessage};
use tether_core::transport::TransportEvent;
use tether_session::StartRequest;

const CONV: ConversationId = ConversationId::new(5);

fn follow_up() -> QueuedMessage {
    QueuedMessage {
        prompt: "now make it dark mode".into(),
        attachments: vec![Attachment {
            name: "palette.json".into(),
            mime_type: "application/json".into(),
            path: PathBuf::from("/tmp/tether-attachments/palette.json"),
            intent: AttachmentIntent::ChatContext,
        }],
        selections: vec![ComponentSelection {
            id: "nav".into(),
            name: "NavBar".into(),
            relative_path: "src/NavBar.tsx".into(),
            line_number: 8,
            column_number: 1,
        }],
    }
}

#[tokio::test]
async fn enqueue_rejects_second_and_keeps_first() {
    let mut h = harness();
    let _live = h.transport.push_live();
    h.controller.start_turn(StartRequest::new(CONV, "first"), None);

    assert!(h.controller.enqueue(CONV, QueuedMessage::text("A")));
    assert!(!h.controller.enqueue(CONV, QueuedMessage::text("B")));
    assert_eq!(h.controller.queued(CONV), Some(QueuedMessage::text("A")));

    let rejected = loop {
        match h.events.try_recv() {
            Ok(SessionEvent::QueueRejected { conversation_id }) => break Some(conversation_id),
            Ok(_) => continue,
            Err(_) => break None,
        }
    };
    assert_eq!(rejected, Some(CONV));
}

#[tokio::test]
async fn queue_drains_after_clean_end_with_exact_payload() {
    let mut h = harness();
    let first = h.transport.push_live();
    let second = h.transport.push_live();

    h.controller.start_turn(StartRequest::new(CONV, "build it"), None);
    assert!(h.controller.enqueue(CONV, follow_up()));
    assert!(eventually(|| h.transport.request_count() == 1).await);
    assert_eq!(h.controller.queued(CONV), Some(follow_up()));

    first.send(end()).unwrap();
    assert_eq!(h.turn_ended(CONV).await, None);

    assert!(eventually(|| h.transport.request_count() == 2).await);
    assert!(h.controller.is_active(CONV));
    assert_eq!(h.controller.queued(CONV), None);

    let expected = follow_up();
    h.transport.with_request(1, |recorded| {
        assert_eq!(recorded.prompt, expected.prompt);
        assert_eq!(recorded.attachments, expected.attachments);
        assert_eq!(recorded.selections, expected.selections);
        assert!(!recorded.redo);
    });

    second.send(end()).unwrap();
    assert_eq!(h.turn_ended(CONV).await, None);
    assert_eq!(h.transport.request_count(), 2);
}

#[tokio::test]
async fn queue_held_after_error_until_cleared() {
    let mut h = harness();
    let first = h.transport.push_live();
    h.transport.push_events(vec![end()]);

    h.controller.start_turn(StartRequest::new(CONV, "build it"), None);
    assert!(h.controller.enqueue(CONV, QueuedMessage::text("follow up")));

    first.send(TransportEvent::Error("model overloaded".into())).unwrap();
    assert_eq!(h.turn_ended(CONV).await.as_deref(), Some("model overloaded"));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.request_count(), 1);
    assert_eq!(h.controller.queued(CONV), Some(QueuedMessage::text("follow up")));

    h.controller.clear_error(CONV);
    assert_eq!(h.turn_ended(CONV).await, None);
    assert_eq!(h.transport.prompts(), vec!["build it", "follow up"]);
    assert_eq!(h.controller.queued(CONV), None);
}

#[tokio::test]
async fn enqueue_while_idle_starts_immediately() {
    let mut h = harness();
    h.transport.push_events(vec![end()]);

    assert!(h.controller.enqueue(CONV, QueuedMessage::text("next")));
    assert_eq!(h.turn_ended(CONV).await, None);
    assert_eq!(h.transport.prompts(), vec!["next"]);
    assert_eq!(h.controller.queued(CONV), None);
}

#[tokio::test]
async fn manual_error_blocks_drain() {
    let mut h = harness();
    h.transport.push_events(vec![end()]);

    h.controller.set_error(CONV, Some("dismiss me".into()));
    assert!(h.controller.enqueue(CONV, QueuedMessage::text("later")));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.request_count(), 0);

    h.controller.set_error(CONV, None);
    assert_eq!(h.turn_ended(CONV).await, None);
    assert_eq!(h.transport.prompts(), vec!["later"]);
}

#[tokio::test]
async fn dequeue_and_clear_remove_unconditionally() {
    let mut h = harness();
    let live = h.transport.push_live();
    h.controller.start_turn(StartRequest::new(CONV, "busy"), None);

    assert!(h.controller.enqueue(CONV, QueuedMessage::text("one")));
    assert_eq!(h.controller.dequeue(CONV), Some(QueuedMessage::text("one")));
    assert_eq!(h.controller.queued(CONV), None);

    assert!(h.controller.enqueue(CONV, QueuedMessage::text("two")));
    h.controller.clear_queue(CONV);
    assert_eq!(h.controller.queued(CONV), None);
    assert_eq!(h.controller.dequeue(CONV), None);

    live.send(end()).unwrap();
    h.turn_ended(CONV).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.transport.request_count(), 1);
}
