//! End-to-end feed tests: FeedApp actor + in-memory backend, paging to exhaustion,
//! live pushes, removals, sends between two participants, close/reopen.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chatfeed_core::{
    FeedAction, FeedApp, FeedContext, FeedReconciler, FeedUpdate, InMemoryEventSource, Message,
    MessageBody, RenderInstruction, SyncState,
};
use tempfile::tempdir;

const CONV: &str = "alice-bob";

fn write_config(data_dir: &str, page_size: u32) {
    let path = std::path::Path::new(data_dir).join("chatfeed_config.json");
    let v = serde_json::json!({
        "page_size": page_size,
        "live_added_limit": 1,
        "live_subscribe": "on_history_exhausted",
    });
    std::fs::write(path, serde_json::to_vec(&v).unwrap()).unwrap();
}

fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

fn msg(id: &str, sender: &str, recipient: &str, ts: i64) -> Message {
    Message {
        id: id.to_string(),
        sender_id: sender.to_string(),
        recipient_id: recipient.to_string(),
        body: MessageBody::text(format!("text {id}")),
        timestamp: ts,
        reply: None,
    }
}

/// Mirrors what a list view would hold, built only from render instructions.
#[derive(Clone, Default)]
struct Collector {
    rows: Arc<Mutex<usize>>,
    instructions: Arc<Mutex<Vec<RenderInstruction>>>,
    revs: Arc<Mutex<Vec<u64>>>,
}

impl FeedReconciler for Collector {
    fn reconcile(&self, update: FeedUpdate) {
        self.revs.lock().unwrap().push(update.rev());
        if let FeedUpdate::Render { instructions, .. } = update {
            let mut rows = self.rows.lock().unwrap();
            for i in &instructions {
                match i {
                    RenderInstruction::AppendedAt { indices }
                    | RenderInstruction::InsertedAt { indices, .. } => *rows += indices.len(),
                    RenderInstruction::RemovedAt { .. } => *rows -= 1,
                    _ => {}
                }
            }
            self.instructions.lock().unwrap().extend(instructions);
        }
    }
}

impl Collector {
    fn rows(&self) -> usize {
        *self.rows.lock().unwrap()
    }

    fn saw(&self, instruction: &RenderInstruction) -> bool {
        self.instructions.lock().unwrap().contains(instruction)
    }
}

fn sync_state(app: &FeedApp) -> Option<SyncState> {
    app.state().conversation.map(|c| c.sync)
}

fn message_ids(app: &FeedApp) -> Vec<String> {
    app.state()
        .conversation
        .map(|c| c.messages.into_iter().map(|m| m.id).collect())
        .unwrap_or_default()
}

fn open_and_exhaust(app: &FeedApp, counterpart: &str) {
    app.dispatch(FeedAction::OpenConversation {
        conversation_id: CONV.into(),
        counterpart_id: counterpart.into(),
    });
    wait_until("conversation opened", Duration::from_secs(5), || {
        app.state().conversation.is_some()
    });
    loop {
        wait_until("page settled", Duration::from_secs(5), || {
            sync_state(app) != Some(SyncState::LoadingOlderPage)
        });
        match sync_state(app) {
            Some(SyncState::HistoryExhausted) => return,
            Some(SyncState::Idle) => {
                let rev = app.state().rev;
                app.dispatch(FeedAction::RequestOlderPage);
                wait_until("request registered", Duration::from_secs(5), || {
                    app.state().rev > rev
                });
            }
            other => panic!("unexpected sync state {other:?}"),
        }
    }
}

fn app_for(
    source: &Arc<InMemoryEventSource>,
    user: &str,
    page_size: u32,
) -> (Arc<FeedApp>, Collector, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    write_config(&dir.path().to_string_lossy(), page_size);
    let app = FeedApp::new(
        dir.path().to_string_lossy().to_string(),
        FeedContext::new(user),
        source.clone(),
    );
    let collector = Collector::default();
    app.listen_for_updates(Box::new(collector.clone()));
    (app, collector, dir)
}

#[test]
fn pages_back_through_history_in_order() {
    let source = Arc::new(InMemoryEventSource::new());
    source.seed(
        CONV,
        (0..23)
            .map(|i| msg(&format!("m{i:02}"), "bob", "alice", i))
            .collect(),
    );
    let (app, collector, _dir) = app_for(&source, "alice", 5);

    open_and_exhaust(&app, "bob");

    let expected: Vec<String> = (0..23).map(|i| format!("m{i:02}")).collect();
    assert_eq!(message_ids(&app), expected);
    // 5 pages with content + 1 empty page.
    assert_eq!(source.fetch_calls().len(), 6);
    assert!(collector.saw(&RenderInstruction::HistoryExhausted));
    wait_until("rows mirrored", Duration::from_secs(5), || {
        collector.rows() == 23
    });

    let revs = collector.revs.lock().unwrap().clone();
    assert!(revs.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn alice_sends_bob_receives() {
    let source = Arc::new(InMemoryEventSource::new());
    source.seed(CONV, vec![msg("hello", "bob", "alice", 1)]);
    let (alice, alice_seen, _dir_a) = app_for(&source, "alice", 10);
    let (bob, bob_seen, _dir_b) = app_for(&source, "bob", 10);

    open_and_exhaust(&alice, "bob");
    open_and_exhaust(&bob, "alice");
    wait_until("both subscribed", Duration::from_secs(5), || {
        alice
            .state()
            .conversation
            .is_some_and(|c| c.live_subscribed)
            && bob.state().conversation.is_some_and(|c| c.live_subscribed)
    });

    alice.dispatch(FeedAction::ReplyTo {
        message_id: "hello".into(),
    });
    wait_until("reply target set", Duration::from_secs(5), || {
        alice
            .state()
            .conversation
            .and_then(|c| c.reply_target)
            .is_some()
    });
    alice.dispatch(FeedAction::SendMessage {
        text: "hi-from-alice".into(),
    });

    let has_text = |app: &FeedApp| {
        app.state().conversation.is_some_and(|c| {
            c.messages
                .iter()
                .any(|m| m.body == MessageBody::text("hi-from-alice"))
        })
    };
    wait_until("alice sees her message", Duration::from_secs(5), || {
        has_text(&alice)
    });
    wait_until("bob receives", Duration::from_secs(5), || has_text(&bob));

    let bob_state = bob.state();
    let received = bob_state
        .conversation
        .as_ref()
        .unwrap()
        .messages
        .last()
        .unwrap();
    assert_eq!(received.sender_id, "alice");
    assert_eq!(
        received.reply.as_ref().map(|r| r.message_id.as_str()),
        Some("hello")
    );
    assert_eq!(bob_state.conversation.as_ref().unwrap().messages.len(), 2);

    // Bob is the recipient: his view scrolls; Alice's own message does not.
    wait_until("bob scrolled", Duration::from_secs(5), || {
        bob_seen.saw(&RenderInstruction::ScrollToBottom { animated: true })
    });
    assert!(!alice_seen.saw(&RenderInstruction::ScrollToBottom { animated: true }));
}

#[test]
fn removal_is_reflected_and_close_releases_subscription() {
    let source = Arc::new(InMemoryEventSource::new());
    source.seed(
        CONV,
        vec![
            msg("a", "bob", "alice", 1),
            msg("b", "bob", "alice", 2),
            msg("c", "alice", "bob", 3),
        ],
    );
    let (app, collector, _dir) = app_for(&source, "alice", 10);
    open_and_exhaust(&app, "bob");
    wait_until("subscribed", Duration::from_secs(5), || {
        source.is_subscribed(CONV)
    });

    source.remove_message(CONV, "b");
    wait_until("b removed", Duration::from_secs(5), || {
        message_ids(&app) == vec!["a", "c"]
    });
    wait_until("rows mirrored", Duration::from_secs(5), || {
        collector.rows() == 2
    });
    assert!(collector.saw(&RenderInstruction::RemovedAt { index: 1 }));

    app.dispatch(FeedAction::CloseConversation);
    wait_until("closed", Duration::from_secs(5), || {
        app.state().conversation.is_none()
    });
    assert_eq!(source.unsubscribe_count(CONV), 1);
    assert!(!source.is_subscribed(CONV));

    // Pushes after close go nowhere.
    source.push_message(CONV, msg("d", "bob", "alice", 4));
    std::thread::sleep(Duration::from_millis(100));
    assert!(app.state().conversation.is_none());

    // Reopening starts from scratch and sees the new message.
    open_and_exhaust(&app, "bob");
    assert_eq!(message_ids(&app), vec!["a", "c", "d"]);
}

#[test]
fn typing_shows_on_the_other_side_until_the_message_is_sent() {
    let source = Arc::new(InMemoryEventSource::new());
    source.seed(CONV, vec![msg("hello", "bob", "alice", 1)]);
    let (alice, _alice_seen, _dir_a) = app_for(&source, "alice", 10);
    let (bob, _bob_seen, _dir_b) = app_for(&source, "bob", 10);
    open_and_exhaust(&alice, "bob");
    open_and_exhaust(&bob, "alice");

    let bob_sees_typing = |bob: &FeedApp| {
        bob.state()
            .conversation
            .is_some_and(|c| c.counterpart_typing)
    };
    alice.dispatch(FeedAction::SetTyping { is_typing: true });
    wait_until("bob sees alice typing", Duration::from_secs(5), || {
        bob_sees_typing(&bob)
    });
    assert!(!alice
        .state()
        .conversation
        .is_some_and(|c| c.counterpart_typing));

    alice.dispatch(FeedAction::SendMessage {
        text: "done typing".into(),
    });
    wait_until("typing cleared by send", Duration::from_secs(5), || {
        !bob_sees_typing(&bob)
    });
    wait_until("bob receives", Duration::from_secs(5), || {
        bob.state().conversation.is_some_and(|c| c.messages.len() == 2)
    });
}
