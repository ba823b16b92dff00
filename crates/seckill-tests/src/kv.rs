//! In-memory configuration store with a controllable watch stream
use std::collections::HashMap;

use crossbeam::channel::{unbounded, Sender};
use parking_lot::Mutex;
use seckill_gateway::{Fetched, KeyValue, KvError, KvStore, WatchEvent, WatchStream};
use tracing::debug;

type EventSender = Sender<Result<WatchEvent, KvError>>;

#[derive(Default)]
struct State {
    revision: i64,
    data: HashMap<String, KeyValue>,
    history: Vec<WatchEvent>,
    watchers: Vec<(String, EventSender)>,
    offline: bool,
    gets: usize,
}

impl State {
    fn broadcast(&mut self, event: WatchEvent) {
        let key = match &event {
            WatchEvent::Put(kv) => kv.key.clone(),
            WatchEvent::Delete { key, .. } => key.clone(),
        };
        self.watchers
            .retain(|(watched, sender)| *watched != key || sender.send(Ok(event.clone())).is_ok());
        self.history.push(event);
    }

    fn check_online(&self) -> Result<(), KvError> {
        if self.offline {
            return Err(KvError::Protocol {
                endpoint: String::from("memory"),
                detail: String::from("store is offline"),
            });
        }
        Ok(())
    }
}

/// Key-value store keeping its whole history in memory
///
/// Watchers subscribing at a past revision get the missed events replayed.
#[derive(Default)]
pub struct MemoryKv {
    state: Mutex<State>,
}

impl MemoryKv {
    /// Create an empty store at revision 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`, returning the new revision
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> i64 {
        let mut state = self.state.lock();
        state.revision += 1;
        let kv = KeyValue {
            key: key.to_owned(),
            value: value.into(),
            revision: state.revision,
        };
        debug!(key, revision = kv.revision, "put");
        state.data.insert(key.to_owned(), kv.clone());
        state.broadcast(WatchEvent::Put(kv));
        state.revision
    }

    /// Remove `key`, returning the revision of the removal if it existed
    pub fn delete(&self, key: &str) -> Option<i64> {
        let mut state = self.state.lock();
        state.data.remove(key)?;
        state.revision += 1;
        let revision = state.revision;
        debug!(key, revision, "delete");
        state.broadcast(WatchEvent::Delete {
            key: key.to_owned(),
            revision,
        });
        Some(revision)
    }

    /// Break every open watch stream
    pub fn disconnect_watchers(&self) {
        let mut state = self.state.lock();
        for (_, sender) in state.watchers.drain(..) {
            let _ = sender.send(Err(KvError::StreamClosed));
        }
    }

    /// Make every call fail (`true`) or succeed again (`false`)
    ///
    /// Going offline also breaks the open watch streams.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
        if offline {
            self.disconnect_watchers();
        }
    }

    /// Number of watch subscriptions that have not been broken
    pub fn watchers(&self) -> usize {
        self.state.lock().watchers.len()
    }

    /// Number of `get` calls served so far
    pub fn gets(&self) -> usize {
        self.state.lock().gets
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Fetched, KvError> {
        let mut state = self.state.lock();
        state.check_online()?;
        state.gets += 1;
        Ok(Fetched {
            kv: state.data.get(key).cloned(),
            revision: state.revision,
        })
    }

    fn watch(&self, key: &str, start_revision: i64) -> Result<WatchStream, KvError> {
        let mut state = self.state.lock();
        state.check_online()?;
        let (sender, receiver) = unbounded();
        for event in &state.history {
            let matches = match event {
                WatchEvent::Put(kv) => kv.key == key,
                WatchEvent::Delete { key: deleted, .. } => deleted == key,
            };
            if matches && event.revision() >= start_revision {
                let _ = sender.send(Ok(event.clone()));
            }
        }
        state.watchers.push((key.to_owned(), sender));
        Ok(WatchStream::new(receiver))
    }
}
