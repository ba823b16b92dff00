//! etcd v3 client speaking the JSON gateway (`/v3/kv/range`, `/v3/watch`)
use std::io::{BufRead, BufReader};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crossbeam::channel::{bounded, Receiver, Sender, TryRecvError};
use reqwest::blocking::{Client, Response};
use seckill_core::Config;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::kv::{Fetched, KeyValue, KvError, KvStore, WatchEvent, WatchStream};

/// Number of undelivered watch events buffered per subscription
const WATCH_BUFFER: usize = 64;

/// Longest silence on a watch stream
///
/// etcd sends progress notifications every 10 minutes by default.
const WATCH_IDLE_TIMEOUT: Duration = Duration::from_secs(11 * 60);

/// Client for a list of etcd endpoints
///
/// Every call tries the endpoints in order and returns the first success.
#[derive(Debug)]
pub struct EtcdClient {
    endpoints: Vec<String>,
    /// Client for unary calls, bounded by the configured timeout
    unary: Client,
    /// Client for watch streams; the timeout bounds each read
    streaming: Client,
}

impl EtcdClient {
    /// Create a client for `endpoints` (`host:port` or full URLs)
    pub fn new(endpoints: &[String], timeout: Duration) -> Result<Self, KvError> {
        if endpoints.is_empty() {
            return Err(KvError::NoEndpoints);
        }
        let unary = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(KvError::Client)?;
        let streaming = Client::builder()
            .timeout(WATCH_IDLE_TIMEOUT)
            .connect_timeout(timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(KvError::Client)?;

        Ok(Self {
            endpoints: endpoints.iter().map(|e| endpoint_url(e)).collect(),
            unary,
            streaming,
        })
    }

    /// Create a client for the endpoints listed in `config`
    pub fn from_config(config: &Config) -> Result<Self, KvError> {
        Self::new(&config.etcd_endpoints(), config.etcd_timeout())
    }

    /// The normalised endpoint URLs
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn range(&self, endpoint: &str, body: &Value) -> Result<Fetched, KvError> {
        let response = self
            .unary
            .post(format!("{endpoint}/v3/kv/range"))
            .json(body)
            .send()
            .and_then(Response::error_for_status)
            .and_then(Response::bytes)
            .map_err(|source| KvError::Transport {
                endpoint: endpoint.to_owned(),
                source,
            })?;
        let range: RangeResponse =
            serde_json::from_slice(&response).map_err(|err| protocol(endpoint, err))?;

        let kv = range
            .kvs
            .into_iter()
            .next()
            .map(|raw| raw.decode(endpoint))
            .transpose()?;
        Ok(Fetched {
            kv,
            revision: range.header.map(|h| h.revision).unwrap_or_default(),
        })
    }
}

impl KvStore for EtcdClient {
    fn get(&self, key: &str) -> Result<Fetched, KvError> {
        let body = json!({ "key": STANDARD.encode(key) });
        let mut last = KvError::NoEndpoints;
        for endpoint in &self.endpoints {
            match self.range(endpoint, &body) {
                Ok(fetched) => return Ok(fetched),
                Err(err) => {
                    warn!(%endpoint, error = %err, "etcd range failed");
                    last = err;
                }
            }
        }
        Err(last)
    }

    fn watch(&self, key: &str, start_revision: i64) -> Result<WatchStream, KvError> {
        let body = json!({
            "create_request": {
                "key": STANDARD.encode(key),
                "start_revision": start_revision,
                "progress_notify": true,
            }
        });
        let mut last = KvError::NoEndpoints;
        for endpoint in &self.endpoints {
            let response = self
                .streaming
                .post(format!("{endpoint}/v3/watch"))
                .json(&body)
                .send()
                .and_then(Response::error_for_status);
            match response {
                Ok(response) => {
                    let (sender, receiver) = bounded(WATCH_BUFFER);
                    let (stream, liveness) = WatchStream::with_liveness(receiver);
                    let source = endpoint.clone();
                    thread::Builder::new()
                        .name(String::from("etcd_watch"))
                        .spawn(move || pump(response, &source, sender, liveness))?;
                    debug!(%endpoint, key, start_revision, "watch established");
                    return Ok(stream);
                }
                Err(source) => {
                    warn!(%endpoint, error = %source, "etcd watch failed");
                    last = KvError::Transport {
                        endpoint: endpoint.clone(),
                        source,
                    };
                }
            }
        }
        Err(last)
    }
}

/// Forward the frames of a watch response until it ends or nobody listens
///
/// A subscription whose stream was dropped is torn down when the next
/// frame arrives; progress notifications bound the wait. Dropping the
/// response closes the connection, which cancels the watch in etcd.
fn pump(
    response: Response,
    endpoint: &str,
    events: Sender<Result<WatchEvent, KvError>>,
    liveness: Receiver<()>,
) {
    for line in BufReader::new(response).lines() {
        if liveness.try_recv() == Err(TryRecvError::Disconnected) {
            debug!(%endpoint, "watch stream dropped, closing subscription");
            return;
        }
        let line = match line {
            Ok(line) => line,
            Err(source) => {
                let _ = events.send(Err(KvError::Stream {
                    endpoint: endpoint.to_owned(),
                    source,
                }));
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let batch = serde_json::from_str::<WatchFrame>(&line)
            .map_err(|err| protocol(endpoint, err))
            .and_then(|frame| frame.into_events(endpoint));
        match batch {
            Ok(batch) => {
                for event in batch {
                    if events.send(Ok(event)).is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = events.send(Err(err));
                return;
            }
        }
    }
    let _ = events.send(Err(KvError::StreamClosed));
}

/// Prefix `endpoint` with `http://` unless it has a scheme
fn endpoint_url(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_owned()
    } else {
        format!("http://{endpoint}")
    }
}

fn protocol(endpoint: &str, detail: impl std::fmt::Display) -> KvError {
    KvError::Protocol {
        endpoint: endpoint.to_owned(),
        detail: detail.to_string(),
    }
}

/// The JSON gateway renders 64-bit integers as strings
fn int64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Text(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Number(n) => Ok(n),
        Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Deserialize, Debug)]
struct ResponseHeader {
    #[serde(default, deserialize_with = "int64")]
    revision: i64,
}

#[derive(Deserialize, Debug)]
struct RangeResponse {
    header: Option<ResponseHeader>,
    #[serde(default)]
    kvs: Vec<RawKeyValue>,
}

#[derive(Deserialize, Debug)]
struct RawKeyValue {
    key: String,
    #[serde(default)]
    value: String,
    #[serde(default, deserialize_with = "int64")]
    mod_revision: i64,
}

impl RawKeyValue {
    fn decode(self, endpoint: &str) -> Result<KeyValue, KvError> {
        let key = STANDARD
            .decode(&self.key)
            .map_err(|err| protocol(endpoint, format_args!("bad key encoding: {err}")))?;
        let value = STANDARD
            .decode(&self.value)
            .map_err(|err| protocol(endpoint, format_args!("bad value encoding: {err}")))?;
        Ok(KeyValue {
            key: String::from_utf8_lossy(&key).into_owned(),
            value,
            revision: self.mod_revision,
        })
    }
}

#[derive(Deserialize, Debug)]
struct WatchFrame {
    result: Option<WatchResult>,
    error: Option<GatewayStatus>,
}

#[derive(Deserialize, Debug)]
struct GatewayStatus {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Debug)]
struct WatchResult {
    #[serde(default)]
    canceled: bool,
    #[serde(default)]
    cancel_reason: String,
    #[serde(default)]
    events: Vec<RawEvent>,
}

#[derive(Deserialize, Debug)]
struct RawEvent {
    /// Absent for puts, which are the protobuf default
    #[serde(rename = "type", default)]
    kind: Option<String>,
    kv: RawKeyValue,
}

impl WatchFrame {
    fn into_events(self, endpoint: &str) -> Result<Vec<WatchEvent>, KvError> {
        if let Some(status) = self.error {
            return Err(protocol(endpoint, status.message));
        }
        let Some(result) = self.result else {
            return Ok(Vec::new());
        };
        if result.canceled {
            return Err(KvError::Canceled(result.cancel_reason));
        }
        result
            .events
            .into_iter()
            .map(|event| {
                let kind = event.kind;
                let kv = event.kv.decode(endpoint)?;
                match kind.as_deref() {
                    None | Some("PUT") => Ok(WatchEvent::Put(kv)),
                    Some("DELETE") => Ok(WatchEvent::Delete {
                        key: kv.key,
                        revision: kv.revision,
                    }),
                    Some(other) => Err(protocol(endpoint, format_args!("unknown event type {other}"))),
                }
            })
            .collect()
    }
}
