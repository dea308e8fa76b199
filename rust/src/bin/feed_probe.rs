// Drives a FeedApp against an in-memory backend and prints what the renderer
// would receive.
//
// usage: feed_probe [--messages N] [--page-size N] [--history <file.json>]

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatfeed_core::{
    FeedAction, FeedApp, FeedContext, FeedReconciler, FeedUpdate, InMemoryEventSource, Message,
    MessageBody, SyncState,
};

const CONVERSATION_ID: &str = "probe";
const LOCAL_USER: &str = "probe-me";
const PEER: &str = "probe-peer";

struct Printer;

impl FeedReconciler for Printer {
    fn reconcile(&self, update: FeedUpdate) {
        if let FeedUpdate::Render {
            rev, instructions, ..
        } = update
        {
            for i in instructions {
                println!("rev={rev} {i:?}");
            }
        }
    }
}

fn synthetic_history(n: usize) -> Vec<Message> {
    let start = chrono::Utc::now().timestamp() - n as i64 * 60;
    (0..n)
        .map(|i| {
            let from_me = i % 3 == 0;
            Message {
                id: format!("msg-{i:05}"),
                sender_id: if from_me { LOCAL_USER } else { PEER }.to_string(),
                recipient_id: if from_me { PEER } else { LOCAL_USER }.to_string(),
                body: MessageBody::text(format!("message #{i}")),
                timestamp: start + i as i64 * 60,
                reply: None,
            }
        })
        .collect()
}

fn wait_for(app: &FeedApp, what: &str, timeout: Duration, f: impl Fn(&FeedApp) -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f(app) {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    tracing::warn!(what, "timed out");
}

fn sync_state(app: &FeedApp) -> Option<SyncState> {
    app.state().conversation.map(|c| c.sync)
}

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let mut count: usize = 60;
    let mut page_size: Option<u32> = None;
    let mut history_file: Option<String> = None;
    while let Some(a) = args.next() {
        match a.as_str() {
            "--messages" => {
                let n = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--messages requires a number"))?;
                count = n.parse()?;
            }
            "--page-size" => {
                let n = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--page-size requires a number"))?;
                page_size = Some(n.parse()?);
            }
            "--history" => {
                history_file = Some(
                    args.next()
                        .ok_or_else(|| anyhow::anyhow!("--history requires a path"))?,
                );
            }
            _ => return Err(anyhow::anyhow!("unknown arg: {a}")),
        }
    }

    let history = match history_file {
        Some(path) => {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice::<Vec<Message>>(&bytes)?
        }
        None => synthetic_history(count),
    };

    let data_dir = std::env::temp_dir().join(format!("feed_probe_{}", std::process::id()));
    std::fs::create_dir_all(&data_dir)?;
    if let Some(page_size) = page_size {
        let cfg = serde_json::json!({ "page_size": page_size });
        std::fs::write(
            data_dir.join("chatfeed_config.json"),
            serde_json::to_vec(&cfg)?,
        )?;
    }

    let source = Arc::new(InMemoryEventSource::new());
    source.seed(CONVERSATION_ID, history);

    let app = FeedApp::new(
        data_dir.to_string_lossy().into_owned(),
        FeedContext::new(LOCAL_USER),
        source.clone(),
    );
    app.listen_for_updates(Box::new(Printer));
    app.dispatch(FeedAction::OpenConversation {
        conversation_id: CONVERSATION_ID.into(),
        counterpart_id: PEER.into(),
    });

    let timeout = Duration::from_secs(10);
    loop {
        wait_for(&app, "page settled", timeout, |a| {
            sync_state(a) != Some(SyncState::LoadingOlderPage)
        });
        match sync_state(&app) {
            Some(SyncState::Idle) => app.dispatch(FeedAction::RequestOlderPage),
            _ => break,
        }
        // Let the dispatched request register before polling again.
        std::thread::sleep(Duration::from_millis(20));
    }

    let ts = chrono::Utc::now().timestamp();
    source.push_message(
        CONVERSATION_ID,
        Message {
            id: "msg-live".into(),
            sender_id: PEER.into(),
            recipient_id: LOCAL_USER.into(),
            body: MessageBody::text("live hello"),
            timestamp: ts,
            reply: None,
        },
    );
    app.dispatch(FeedAction::SendMessage {
        text: "reply from probe".into(),
    });
    std::thread::sleep(Duration::from_millis(300));
    app.dispatch(FeedAction::CloseConversation);
    std::thread::sleep(Duration::from_millis(50));

    let state = app.state();
    println!(
        "done: rev={} fetches={} unsubscribes={}",
        state.rev,
        source.fetch_calls().len(),
        source.unsubscribe_count(CONVERSATION_ID)
    );
    if let Some(last) = source.history(CONVERSATION_ID).last() {
        let when = chrono::DateTime::from_timestamp(last.timestamp, 0)
            .map(|d| d.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        println!("newest message {} at {when}", last.id);
    }
    let _ = std::fs::remove_dir_all(&data_dir);
    Ok(())
}
