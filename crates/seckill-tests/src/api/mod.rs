use std::sync::Arc;

use eyre::Result;
use flume::Sender;
use nanorand::Rng;
use seckill_core::{Reply, RequestKind};
use seckill_gateway::{USER_AUTH_SIGN_COOKIE, USER_ID_COOKIE};
use tokio::sync::oneshot;

pub mod mock;

struct RequestMsg {
    kind: RequestKind,
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
    access_time: i64,
    response_channel: oneshot::Sender<Reply>,
}

pub struct Api {
    /// One channel per worker thread
    channels: Arc<Vec<Sender<RequestMsg>>>,

    my_channel: Sender<RequestMsg>,
    my_index: usize,
}

impl Api {
    fn new(channels: Vec<Sender<RequestMsg>>) -> Self {
        let my_channel = channels[0].clone();
        Self {
            channels: Arc::new(channels),
            my_channel,
            my_index: 0,
        }
    }
}

impl Clone for Api {
    fn clone(&self) -> Self {
        let my_index = (self.my_index + 1) % self.channels.len();
        Self {
            channels: self.channels.clone(),
            my_channel: self.channels[my_index].clone(),
            my_index,
        }
    }
}

/// Query parameters and cookies of a request
#[derive(Clone, Default, Debug)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub cookies: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.push((name.to_owned(), value.to_string()));
        self
    }

    pub fn with_cookie(mut self, name: &str, value: impl ToString) -> Self {
        self.cookies.push((name.to_owned(), value.to_string()));
        self
    }
}

impl Api {
    /// Send a request received at wall-clock second `now`
    pub async fn request(
        &self,
        kind: RequestKind,
        now: i64,
        options: RequestOptions,
    ) -> Result<Reply> {
        let (sender, receiver) = oneshot::channel();
        let msg = RequestMsg {
            kind,
            query: options.query,
            cookies: options.cookies,
            access_time: now,
            response_channel: sender,
        };
        self.my_channel.send_async(msg).await?;
        Ok(receiver.await?)
    }

    /// `GET /secinfo[?product_id=..]`
    pub async fn sec_info(&self, product_id: Option<u64>, now: i64) -> Result<Reply> {
        let mut options = RequestOptions::default();
        if let Some(id) = product_id {
            options = options.with_query("product_id", id);
        }
        self.request(RequestKind::SecInfo, now, options).await
    }

    pub fn create_user_session(&self, user_id: u64, sign: impl Into<String>) -> UserSession {
        UserSession {
            api: self,
            user_id,
            sign: sign.into(),
        }
    }

    /// Create a session for a random user; `sign` computes the signature
    pub fn create_random_user_session(&self, sign: impl FnOnce(u64) -> String) -> UserSession {
        let mut bytes = [0u8; 8];
        nanorand::tls_rng().fill(&mut bytes);
        let user_id = u64::from_le_bytes(bytes) >> 1;
        self.create_user_session(user_id, sign(user_id))
    }
}

pub struct UserSession<'a> {
    pub api: &'a Api,
    pub user_id: u64,
    pub sign: String,
}

impl<'a> UserSession<'a> {
    fn request_options(&self) -> RequestOptions {
        RequestOptions::default()
            .with_cookie(USER_ID_COOKIE, self.user_id)
            .with_cookie(USER_AUTH_SIGN_COOKIE, &self.sign)
    }

    /// `GET /seckill?product_id=..` with the session's cookies
    pub async fn seckill(&self, product_id: u64, now: i64) -> Result<Reply> {
        let options = self
            .request_options()
            .with_query("product_id", product_id)
            .with_query("src", "test")
            .with_query("authcode", "x")
            .with_query("time", now)
            .with_query("nance", "n");
        self.api.request(RequestKind::Seckill, now, options).await
    }
}
