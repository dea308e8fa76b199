mod actions;
mod core;
mod error;
mod logging;
mod source;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use crate::core::{FeedConfig, FeedCore, FeedStore, LiveSubscribeMode};
pub use actions::FeedAction;
pub use error::SourceError;
pub use logging::init_logging;
pub use source::{EventSource, FetchCall, InMemoryEventSource};
pub use state::*;
pub use updates::*;

/// Receives every [`FeedUpdate`] on a dedicated thread, in emission order.
pub trait FeedReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: FeedUpdate);
}

/// Handle the UI layer holds. All feed state lives on one actor thread;
/// this handle only enqueues actions and reads snapshots.
pub struct FeedApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<FeedUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<FeedState>>,
}

impl FeedApp {
    pub fn new(data_dir: String, context: FeedContext, source: Arc<dyn EventSource>) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, user = %context.local_user_id, "FeedApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(FeedState::empty()));

        // Actor loop thread (single threaded "feed actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        thread::spawn(move || {
            let mut core = FeedCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                context,
                source,
                shared_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
        })
    }

    pub fn state(&self) -> FeedState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: FeedAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn FeedReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split updates.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
