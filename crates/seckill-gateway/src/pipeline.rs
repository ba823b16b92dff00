//! Implementation of the admission pipeline
use std::sync::Arc;

use seckill_core::{Envelope, ErrorCode, Request, RequestHandler, RequestKind};
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::limiter::{Decision, RateLimiter};
use crate::registry::ProductRegistry;
use crate::status::evaluate;
use crate::watcher::WatcherHandle;

/// Cookie carrying the user id
pub const USER_ID_COOKIE: &str = "userId";
/// Cookie carrying the user's signature
pub const USER_AUTH_SIGN_COOKIE: &str = "userAuthSign";

/// Message of [`ErrorCode::ServiceBusy`]
pub const MSG_SERVICE_BUSY: &str = "service busy";
/// Message of [`ErrorCode::NotFoundProduct`]
pub const MSG_NOT_FOUND: &str = "product not found";

/// The gateway answering client requests
///
/// Composes authentication, rate limiting and status evaluation against the
/// current product snapshot.
pub struct Gateway {
    registry: Arc<ProductRegistry>,
    authenticator: Authenticator,
    limiter: RateLimiter,
    watcher: Option<WatcherHandle>,
}

impl Gateway {
    /// Create a new [`Gateway`]
    ///
    /// The gateway takes ownership of `watcher` and stops it on
    /// [`shutdown()`][RequestHandler::shutdown].
    pub fn new(
        registry: Arc<ProductRegistry>,
        authenticator: Authenticator,
        limiter: RateLimiter,
        watcher: Option<WatcherHandle>,
    ) -> Self {
        Self {
            registry,
            authenticator,
            limiter,
            watcher,
        }
    }

    /// The registry requests are evaluated against
    pub fn registry(&self) -> &Arc<ProductRegistry> {
        &self.registry
    }

    /// Run the admission checks for a `/seckill` request
    pub fn seckill(&self, rq: &Request) -> Envelope {
        let product_id = match rq.query("product_id").map(parse_product_id) {
            Some(Some(id)) => id,
            Some(None) => return invalid_request("invalid product_id"),
            None => return invalid_request("missing product_id"),
        };
        if rq.access_time() <= 0 {
            return invalid_request("missing access time");
        }
        debug!(
            product_id,
            src = rq.query("src"),
            authcode = rq.query("authcode"),
            time = rq.query("time"),
            nance = rq.query("nance"),
            client_addr = ?rq.client_addr(),
            "seckill request"
        );

        let Some(user_id) = rq.cookie(USER_ID_COOKIE).and_then(|v| v.parse::<u64>().ok()) else {
            return invalid_cookie(USER_ID_COOKIE);
        };
        let Some(sign) = rq.cookie(USER_AUTH_SIGN_COOKIE) else {
            return invalid_cookie(USER_AUTH_SIGN_COOKIE);
        };
        if let Err(err) = self.authenticator.verify(user_id, sign) {
            info!(user_id, product_id, "authentication failed");
            return Envelope::error(ErrorCode::AuthFailed, err.to_string());
        }

        if self.limiter.observe(user_id, rq.access_time()) == Decision::Throttle {
            info!(user_id, product_id, "rate limit exceeded");
            return Envelope::error(ErrorCode::ServiceBusy, MSG_SERVICE_BUSY);
        }

        let Some(product) = self.registry.lookup(product_id) else {
            return Envelope::error(ErrorCode::NotFoundProduct, MSG_NOT_FOUND);
        };
        let verdict = evaluate(&product, rq.access_time());
        debug!(user_id, product_id, code = verdict.code.code(), "admission verdict");
        match verdict.code {
            ErrorCode::Ok => Envelope::success(),
            code => Envelope::error(code, verdict.status),
        }
    }

    /// Report the status of one product, or of every product
    pub fn sec_info(&self, rq: &Request) -> Envelope {
        let now = rq.access_time();
        match rq.query("product_id").map(parse_product_id) {
            Some(Some(product_id)) => match self.registry.lookup(product_id) {
                Some(product) => Envelope::Item(evaluate(&product, now).into_info(product_id)),
                None => Envelope::error(ErrorCode::NotFoundProduct, MSG_NOT_FOUND),
            },
            Some(None) => invalid_request("invalid product_id"),
            None => {
                let snapshot = self.registry.snapshot();
                Envelope::List(
                    snapshot
                        .iter()
                        .map(|product| evaluate(product, now).into_info(product.product_id))
                        .collect(),
                )
            }
        }
    }
}

impl RequestHandler for Gateway {
    fn handle(&self, rq: Request) {
        let envelope = match rq.kind() {
            RequestKind::Seckill => self.seckill(&rq),
            RequestKind::SecInfo => self.sec_info(&rq),
        };
        debug!(
            kind = rq.kind().path(),
            code = envelope.code().code(),
            message = envelope.message(),
            "responding"
        );
        rq.respond(envelope);
    }

    fn shutdown(self) {
        if let Some(watcher) = self.watcher {
            watcher.shutdown();
        }
        info!("gateway shut down");
    }
}

/// Product ids are positive integers
fn parse_product_id(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok().filter(|&id| id != 0)
}

fn invalid_request(detail: &str) -> Envelope {
    Envelope::error(ErrorCode::InvalidRequest, format!("invalid request: {detail}"))
}

fn invalid_cookie(name: &str) -> Envelope {
    Envelope::error(ErrorCode::AuthFailed, format!("invalid cookie: {name}"))
}
