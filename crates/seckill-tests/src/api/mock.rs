//! Mock API implementation directly using the `seckill-gateway` crate

use std::sync::Arc;

use eyre::Result;
use seckill_core::{Config, Envelope, RawRequest, Reply, Request, RequestHandler};
use seckill_gateway::{Gateway, KvStore};
use tokio::sync::oneshot;
use tokio::task::{self, JoinHandle};
use uuid::Uuid;

use super::{Api, RequestMsg};

pub struct MockGateway {
    gateway: Arc<Gateway>,
    join_handles: Vec<JoinHandle<()>>,
}

struct MockRawRequest {
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    response_channel: oneshot::Sender<Reply>,
}

pub async fn start(
    threads: u16,
    config: Config,
    kv: Arc<dyn KvStore>,
) -> Result<(MockGateway, Api)> {
    let gateway = Arc::new(
        task::spawn_blocking(move || seckill_gateway::launch(&config, kv)).await??,
    );

    let it = (0..threads).map(|_| {
        let (sender, receiver) = flume::bounded::<RequestMsg>(65536);
        let gateway = gateway.clone();
        let handle = task::spawn_blocking(move || {
            let gateway = &*gateway;
            for msg in receiver.into_iter() {
                let raw = Box::new(MockRawRequest {
                    query: msg.query,
                    cookies: msg.cookies,
                    response_channel: msg.response_channel,
                });
                gateway.handle(Request::from_raw(
                    msg.kind,
                    Uuid::new_v4(),
                    msg.access_time,
                    None,
                    raw,
                ))
            }
        });
        (sender, handle)
    });
    let (senders, join_handles) = it.unzip();

    let mock_gateway = MockGateway {
        gateway,
        join_handles,
    };
    Ok((mock_gateway, Api::new(senders)))
}

impl MockGateway {
    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub async fn shutdown(self) {
        for handle in self.join_handles {
            handle.await.unwrap()
        }
        task::spawn_blocking(move || Arc::into_inner(self.gateway).unwrap().shutdown())
            .await
            .unwrap();
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

impl RawRequest for MockRawRequest {
    fn query(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        lookup(&self.cookies, name)
    }

    /// Goes through JSON, the way a client sees the response
    fn respond(self: Box<Self>, envelope: Envelope, _request_id: Uuid) {
        let body = envelope.to_json().unwrap();
        let reply: Reply = serde_json::from_slice(&body).unwrap();
        // The test may have stopped waiting.
        let _ = self.response_channel.send(reply);
    }
}
