use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::event::MapEvent;
use crate::listener::ListenerHandle;
use crate::{Data, Key};

/// What to do with queued deliveries when the dispatcher is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Deliver everything already queued, then exit.
    Flush,
    /// Discard everything already queued and exit as soon as possible.
    Abandon,
}

enum Task<K, V> {
    Deliver(MapEvent<K, V>, ListenerHandle<K, V>),
    Stop,
}

struct Worker<K, V> {
    tx: mpsc::UnboundedSender<Task<K, V>>,
    abandon: Arc<AtomicBool>,
    handle: tokio::task::JoinHandle<()>,
}

/// Single-consumer queue that moves listener callbacks off the event-ingest
/// path. One worker task drains the queue in FIFO order, which yields
/// per-listener and per-key in-order delivery; there is no ordering guarantee
/// across listeners.
///
/// The dispatcher can be stopped and started again: a released view stops it
/// and discards whatever was queued, the next synchronization brings it back.
/// Listener panics are caught and logged; they never take the worker down.
pub struct EventDispatcher<K: Key, V: Data> {
    worker: std::sync::Mutex<Option<Worker<K, V>>>,
}

impl<K: Key, V: Data> EventDispatcher<K, V> {
    pub fn new() -> Self {
        let dispatcher = Self { worker: std::sync::Mutex::new(None) };
        dispatcher.start();
        dispatcher
    }

    /// Spawn the worker if it is not running. Idempotent.
    pub fn start(&self) {
        let mut guard = self.worker.lock().unwrap();
        if guard.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<Task<K, V>>();
        let abandon = Arc::new(AtomicBool::new(false));
        let abandon2 = abandon.clone();
        let handle = crate::task::spawn(async move {
            while let Some(task) = rx.recv().await {
                match task {
                    Task::Stop => break,
                    Task::Deliver(..) if abandon2.load(Ordering::Acquire) => continue,
                    Task::Deliver(event, listener) => {
                        let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener.dispatch(&event)));
                        if result.is_err() {
                            error!("listener panicked while handling {}", event);
                        }
                    }
                }
            }
            debug!("event dispatcher worker exited");
        });
        *guard = Some(Worker { tx, abandon, handle });
    }

    /// Queue one delivery. Never blocks; silently drops if the dispatcher is
    /// stopped.
    pub fn schedule(&self, event: MapEvent<K, V>, listener: ListenerHandle<K, V>) {
        let guard = self.worker.lock().unwrap();
        match &*guard {
            Some(worker) => {
                if worker.tx.send(Task::Deliver(event, listener)).is_err() {
                    debug!("dispatch after stop, dropping event");
                }
            }
            None => debug!("dispatch while stopped, dropping event"),
        }
    }

    /// Signal the worker and wait for it to finish. Stopping a stopped
    /// dispatcher is a no-op.
    pub async fn stop(&self, mode: DrainMode) {
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            if mode == DrainMode::Abandon {
                worker.abandon.store(true, Ordering::Release);
            }
            let _ = worker.tx.send(Task::Stop);
            if worker.handle.await.is_err() {
                error!("event dispatcher worker aborted");
            }
        }
    }
}

impl<K: Key, V: Data> Default for EventDispatcher<K, V> {
    fn default() -> Self { Self::new() }
}
