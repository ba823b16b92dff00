//! Implementation of the configuration watcher
//!
//! The watcher bootstraps the [`ProductRegistry`] from the configuration
//! store and then follows the watch stream of the product key, publishing a
//! fresh snapshot for every valid update.
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use rand::Rng;
use seckill_core::decode_products;
use tracing::{debug, error, info, warn};

use crate::kv::{KeyValue, KvError, KvStore, WatchEvent, WatchStream};
use crate::registry::{ProductRegistry, Snapshot};

/// Delay before the first reconnect attempt
const INITIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Keeps the [`ProductRegistry`] in sync with the configuration store
pub struct Watcher {
    kv: Arc<dyn KvStore>,
    registry: Arc<ProductRegistry>,
    /// The watched key
    key: String,
    /// Upper bound for the delay between reconnect attempts
    max_backoff: Duration,
    /// Consecutive failed reconnect attempts before giving up
    max_retries: u32,
}

/// How a watch session ended
enum Session {
    Shutdown,
    Lost(KvError),
}

impl Watcher {
    /// Create a [`Watcher`] for `key`
    pub fn new(
        kv: Arc<dyn KvStore>,
        registry: Arc<ProductRegistry>,
        key: impl Into<String>,
        max_backoff: Duration,
        max_retries: u32,
    ) -> Self {
        Self {
            kv,
            registry,
            key: key.into(),
            max_backoff: max_backoff.max(INITIAL_BACKOFF),
            max_retries,
        }
    }

    /// The watched key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the key once and publish its value
    ///
    /// Returns the store revision of the read, from which watching resumes.
    pub fn bootstrap(&self) -> Result<i64, KvError> {
        let fetched = self.kv.get(&self.key)?;
        match fetched.kv {
            Some(kv) => self.publish(&kv),
            None => warn!(key = %self.key, "product key is absent, serving no products"),
        }
        Ok(fetched.revision)
    }

    /// Apply one event of the watch stream
    pub fn apply(&self, event: WatchEvent) {
        match event {
            WatchEvent::Put(kv) if kv.key == self.key => self.publish(&kv),
            WatchEvent::Delete { key, revision } if key == self.key => {
                warn!(
                    %key,
                    revision, "product key deleted, keeping the previous snapshot"
                );
            }
            event => debug!(?event, "ignoring event for another key"),
        }
    }

    /// Decode `kv` and publish it; keep the current snapshot if it is invalid
    fn publish(&self, kv: &KeyValue) {
        match decode_products(&kv.value) {
            Ok(products) => {
                let snapshot = Snapshot::new(kv.revision, products);
                let len = snapshot.len();
                self.registry.publish(snapshot);
                info!(revision = kv.revision, products = len, "published product snapshot");
            }
            Err(err) => {
                error!(
                    revision = kv.revision,
                    error = %err,
                    "rejecting product update, keeping the previous snapshot"
                );
            }
        }
    }

    /// Start following the watch stream from `revision + 1` on a dedicated
    /// thread
    pub fn spawn(self, revision: i64) -> Result<WatcherHandle, KvError> {
        let (shutdown, shutdown_receiver) = bounded(1);
        let thread = thread::Builder::new()
            .name(String::from("product_watcher"))
            .spawn(move || self.run(revision, shutdown_receiver))?;
        Ok(WatcherHandle { shutdown, thread })
    }

    /// The watcher's main routine
    ///
    /// Returns when `shutdown` fires (or its sender is dropped), or when
    /// `max_retries` reconnect attempts in a row did not get a watch stream
    /// established.
    pub fn run(&self, revision: i64, shutdown: Receiver<()>) {
        let mut next_revision = revision + 1;
        let mut failures = 0;

        loop {
            let lost = match self.kv.watch(&self.key, next_revision) {
                Ok(stream) => {
                    info!(key = %self.key, revision = next_revision, "watching product key");
                    failures = 0;
                    match self.follow(&stream, &shutdown, &mut next_revision) {
                        Session::Shutdown => return,
                        Session::Lost(err) => err,
                    }
                }
                Err(err) => err,
            };
            warn!(error = %lost, "watch stream lost, serving the last known snapshot");

            // Reconnect: back off, then re-read the key so that nothing
            // published during the disruption is missed.
            loop {
                failures += 1;
                if failures > self.max_retries {
                    error!(
                        attempts = failures - 1,
                        "giving up on the watch stream, products are frozen"
                    );
                    return;
                }
                let delay = self.backoff(failures);
                debug!(attempt = failures, ?delay, "reconnecting");
                match shutdown.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                }
                match self.bootstrap() {
                    Ok(revision) => {
                        next_revision = revision + 1;
                        break;
                    }
                    Err(err) => warn!(attempt = failures, error = %err, "resync failed"),
                }
            }
        }
    }

    /// Apply events until the stream breaks or shutdown is requested
    fn follow(
        &self,
        stream: &WatchStream,
        shutdown: &Receiver<()>,
        next_revision: &mut i64,
    ) -> Session {
        loop {
            select! {
                recv(shutdown) -> _ => return Session::Shutdown,
                recv(stream.events()) -> msg => match msg {
                    Ok(Ok(event)) => {
                        *next_revision = (*next_revision).max(event.revision() + 1);
                        self.apply(event);
                    }
                    Ok(Err(err)) => return Session::Lost(err),
                    Err(_) => return Session::Lost(KvError::StreamClosed),
                },
            }
        }
    }

    /// Exponential backoff with jitter, capped at `max_backoff`
    fn backoff(&self, attempt: u32) -> Duration {
        let exp = INITIAL_BACKOFF.saturating_mul(1 << attempt.saturating_sub(1).min(16));
        let base = exp.min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0..=base.as_millis() as u64 / 4);
        base + Duration::from_millis(jitter)
    }
}

/// Owner of the watcher thread
#[derive(Debug)]
pub struct WatcherHandle {
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl WatcherHandle {
    /// Whether the watcher stopped on its own (it gave up reconnecting)
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the watcher and wait for its thread to terminate
    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            error!("product watcher panicked");
        }
    }
}
