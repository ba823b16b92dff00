//! Interface to the external configuration store
use crossbeam::channel::{bounded, Receiver, Sender};
use thiserror::Error;

/// A key with its value as stored in the configuration store
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct KeyValue {
    /// The key
    pub key: String,
    /// The raw value
    pub value: Vec<u8>,
    /// Store revision of the last modification
    pub revision: i64,
}

/// Result of [`KvStore::get()`]
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Fetched {
    /// The key, if present
    pub kv: Option<KeyValue>,
    /// Store revision at the time of the read
    pub revision: i64,
}

/// Change of a watched key
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum WatchEvent {
    /// The key was created or updated
    Put(KeyValue),
    /// The key was removed
    Delete {
        /// The key
        key: String,
        /// Store revision of the removal
        revision: i64,
    },
}

impl WatchEvent {
    /// Store revision the event happened at
    pub fn revision(&self) -> i64 {
        match self {
            WatchEvent::Put(kv) => kv.revision,
            WatchEvent::Delete { revision, .. } => *revision,
        }
    }
}

/// Error talking to the configuration store
#[derive(Debug, Error)]
pub enum KvError {
    /// No endpoint is configured
    #[error("no endpoint configured")]
    NoEndpoints,
    /// The HTTP client could not be set up
    #[error("cannot build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    /// The request could not be sent or its response not be read
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        /// Endpoint the request was sent to
        endpoint: String,
        /// Underlying error
        #[source]
        source: reqwest::Error,
    },
    /// The store answered with something unexpected
    #[error("malformed response from {endpoint}: {detail}")]
    Protocol {
        /// Endpoint that answered
        endpoint: String,
        /// What was wrong
        detail: String,
    },
    /// The store canceled the watch, e.g. because the revision was compacted
    #[error("watch canceled: {0}")]
    Canceled(String),
    /// Reading the watch stream failed
    #[error("watch stream from {endpoint} broke: {source}")]
    Stream {
        /// Endpoint the stream came from
        endpoint: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The watch stream ended
    #[error("watch stream closed")]
    StreamClosed,
    /// A helper thread could not be started
    #[error("cannot spawn thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Events of a watch subscription
///
/// The subscription ends when the stream yields an error or the sending
/// side is gone. Dropping the stream cancels the subscription.
#[derive(Debug)]
pub struct WatchStream {
    events: Receiver<Result<WatchEvent, KvError>>,
    /// Disconnects the paired receiver on drop
    _alive: Option<Sender<()>>,
}

impl WatchStream {
    /// Wrap the receiving end of a subscription
    pub fn new(events: Receiver<Result<WatchEvent, KvError>>) -> Self {
        Self {
            events,
            _alive: None,
        }
    }

    /// Like [`WatchStream::new()`], also returning a receiver that
    /// disconnects once the stream is dropped
    ///
    /// Producers that cannot notice a dropped stream by sending to it poll
    /// the receiver with `try_recv()`.
    pub fn with_liveness(events: Receiver<Result<WatchEvent, KvError>>) -> (Self, Receiver<()>) {
        let (alive, liveness) = bounded(0);
        let stream = Self {
            events,
            _alive: Some(alive),
        };
        (stream, liveness)
    }

    /// The channel the events arrive on
    #[inline]
    pub fn events(&self) -> &Receiver<Result<WatchEvent, KvError>> {
        &self.events
    }
}

/// A key-value store with change notifications
pub trait KvStore: Send + Sync {
    /// Read `key`
    fn get(&self, key: &str) -> Result<Fetched, KvError>;

    /// Subscribe to changes of `key` starting at `start_revision`
    ///
    /// Changes with a revision of at least `start_revision` that already
    /// happened are delivered first.
    fn watch(&self, key: &str, start_revision: i64) -> Result<WatchStream, KvError>;
}
