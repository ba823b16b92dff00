use std::net::IpAddr;

use uuid::Uuid;

use crate::Envelope;

/// Kind of the request
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum RequestKind {
    /// Attempt to take part in a flash sale
    ///
    /// Requires the `product_id` query parameter and the `userId` and
    /// `userAuthSign` cookies. The response is a bare verdict.
    Seckill,

    /// Retrieve the status of one product (`product_id` given) or of all
    /// products
    SecInfo,
}

impl RequestKind {
    /// Path under which the request kind is served
    pub fn path(self) -> &'static str {
        match self {
            RequestKind::Seckill => "/seckill",
            RequestKind::SecInfo => "/secinfo",
        }
    }
}

/// Request sent by a client
///
/// Carries everything captured at ingress. The transport-specific parts
/// (query, cookies, the way back to the client) live behind [`RawRequest`].
pub struct Request {
    kind: RequestKind,
    id: Uuid,
    access_time: i64,
    client_addr: Option<IpAddr>,
    raw: Box<dyn RawRequest + Send>,
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("access_time", &self.access_time)
            .field("client_addr", &self.client_addr)
            .field("raw", &format_args!(".."))
            .finish()
    }
}

/// Interface for handling requests from clients
pub trait RequestHandler {
    /// Handle a request
    ///
    /// This method may be called concurrently from different threads. It
    /// must answer the request exactly once.
    fn handle(&self, request: Request);

    /// Shut the gateway down
    ///
    /// This method waits for all threads spawned by the gateway (i.e., the
    /// configuration watcher) to have terminated.
    fn shutdown(self);
}

/// A raw request, implemented by the HTTP server and by test transports
pub trait RawRequest {
    /// Get a decoded query parameter
    fn query(&self, name: &str) -> Option<&str>;

    /// Get the value of a cookie
    fn cookie(&self, name: &str) -> Option<&str>;

    /// Send `envelope` to the client
    ///
    /// Failures (e.g., the client went away) are the transport's business.
    fn respond(self: Box<Self>, envelope: Envelope, request_id: Uuid);
}

impl Request {
    /// Get the request's kind
    #[inline]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Get the id correlating the request with its log lines and response
    #[inline]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wall-clock second at which the request was received
    #[inline]
    pub fn access_time(&self) -> i64 {
        self.access_time
    }

    /// Host part of the peer address, if known
    #[inline]
    pub fn client_addr(&self) -> Option<IpAddr> {
        self.client_addr
    }

    /// Get a decoded query parameter
    #[inline]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.raw.query(name)
    }

    /// Get the value of a cookie
    #[inline]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.raw.cookie(name)
    }

    /// Respond with `envelope`
    ///
    /// Consumes the request, so every request is answered at most once.
    /// This method blocks until the response has been handed to the
    /// transport.
    #[inline]
    pub fn respond(self, envelope: Envelope) {
        self.raw.respond(envelope, self.id);
    }

    /// Create a new request from a [`RawRequest`]
    ///
    /// `access_time` is the wall-clock second the transport received the
    /// request at.
    #[inline]
    pub fn from_raw(
        kind: RequestKind,
        id: Uuid,
        access_time: i64,
        client_addr: Option<IpAddr>,
        raw: Box<dyn RawRequest + Send>,
    ) -> Self {
        Self {
            kind,
            id,
            access_time,
            client_addr,
            raw,
        }
    }
}
