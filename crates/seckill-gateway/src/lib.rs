//! :zap: The flash-sale admission gateway.
//!
//! The gateway is assembled from a [product registry][registry], a
//! [configuration watcher][watcher] keeping the registry in sync with the
//! configuration store, an [authenticator][auth], a [rate limiter][limiter],
//! and the [status evaluator][status]. The [pipeline] composes them into a
//! [`RequestHandler`][seckill_core::RequestHandler].

#![allow(rustdoc::private_intra_doc_links)]
use std::sync::Arc;

use seckill_core::{Config, ConfigError};
use thiserror::Error;
use tracing::info;

pub mod auth;
pub mod etcd;
pub mod kv;
pub mod limiter;
mod pipeline;
pub mod registry;
pub mod status;
pub mod watcher;

pub use auth::{AuthFailed, Authenticator, InvalidSecret};
pub use etcd::EtcdClient;
pub use kv::{Fetched, KeyValue, KvError, KvStore, WatchEvent, WatchStream};
pub use limiter::{Decision, RateLimiter};
pub use pipeline::{Gateway, MSG_NOT_FOUND, MSG_SERVICE_BUSY, USER_AUTH_SIGN_COOKIE, USER_ID_COOKIE};
pub use registry::{ProductRegistry, Snapshot};
pub use watcher::{Watcher, WatcherHandle};

/// Error bringing the gateway up
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The configuration is unusable
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The cookie secret cannot be used for signatures
    #[error(transparent)]
    Secret(#[from] InvalidSecret),
    /// The configuration store could not be read
    #[error("cannot bootstrap products: {0}")]
    Kv(#[from] KvError),
}

/// Entrypoint of the gateway
///
/// Reads the product key once and publishes it, then starts watching it for
/// updates. Fails if the configuration is invalid or the configuration store
/// cannot be reached; in that case nothing keeps running.
pub fn launch(config: &Config, kv: Arc<dyn KvStore>) -> Result<Gateway, GatewayError> {
    config.validate()?;
    let authenticator =
        Authenticator::new(config.cookie_secretkey.clone(), config.cookie_sign_algorithm)?;

    let registry = Arc::new(ProductRegistry::new());
    let watcher = Watcher::new(
        kv,
        registry.clone(),
        config.product_key(),
        config.etcd_timeout(),
        config.watch_max_retries,
    );
    let revision = watcher.bootstrap()?;
    info!(
        key = watcher.key(),
        revision,
        products = registry.snapshot().len(),
        "bootstrapped product registry"
    );
    if let Some(redis_addr) = &config.redis_addr {
        info!(%redis_addr, "redis address configured, not used by the gateway");
    }
    let watcher = watcher.spawn(revision)?;

    Ok(Gateway::new(
        registry,
        authenticator,
        RateLimiter::new(config.user_sec_access_limit),
        Some(watcher),
    ))
}
