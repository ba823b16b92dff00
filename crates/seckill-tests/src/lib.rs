use std::sync::Arc;
use std::time::Duration;

use eyre::{eyre, Result};
use seckill_core::{Config, Product, ProductStatus, SignatureScheme};
use seckill_gateway::{Authenticator, KvStore, ProductRegistry};
use serde_json::json;

mod api;
mod kv;
pub use api::{Api, RequestOptions, UserSession};
pub use kv::MemoryKv;

/// Secret the gateway is configured with unless overridden
pub const SECRET: &str = "S";

pub struct TestCtxBuilder {
    /// Server-side secret for user signatures
    pub secret: String,
    /// Signature algorithm
    pub scheme: SignatureScheme,
    /// Requests per user and second
    pub limit: u32,
    /// Products stored before the gateway starts; the key is absent if `None`
    pub products: Option<Vec<Product>>,
    /// Count of worker threads
    pub threads: u16,
    /// Consecutive failed reconnects before the watcher gives up
    pub watch_max_retries: u32,
    /// Store to run against; a fresh [`MemoryKv`] if `None`
    pub kv: Option<Arc<MemoryKv>>,
}

impl Default for TestCtxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestCtxBuilder {
    /// Create a new test context builder initialized with defaults
    pub fn new() -> Self {
        TestCtxBuilder {
            secret: SECRET.to_owned(),
            scheme: SignatureScheme::HmacSha256,
            limit: 1,
            products: None,
            threads: 2,
            watch_max_retries: 30,
            kv: None,
        }
    }

    /// Set the server-side secret
    pub fn with_secret(mut self, secret: &str) -> Self {
        self.secret = secret.to_owned();
        self
    }

    /// Set the signature scheme
    pub fn with_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Set the number of accepted requests per user and second
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Store `products` before launching
    pub fn with_products(mut self, products: Vec<Product>) -> Self {
        self.products = Some(products);
        self
    }

    /// Set the number of worker threads to use
    pub fn with_threads(mut self, threads: u16) -> Self {
        assert_ne!(threads, 0);
        self.threads = threads;
        self
    }

    /// Set the number of reconnect attempts of the watcher
    pub fn with_watch_max_retries(mut self, retries: u32) -> Self {
        self.watch_max_retries = retries;
        self
    }

    /// Run against `kv` instead of a fresh store
    pub fn with_kv(mut self, kv: Arc<MemoryKv>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Get the [`Config`] for launching the gateway
    pub fn config(&self) -> Config {
        Config {
            etcd_addr: String::from("memory"),
            etcd_timeout: 1,
            cookie_secretkey: self.secret.clone(),
            cookie_sign_algorithm: self.scheme,
            user_sec_access_limit: self.limit,
            watch_max_retries: self.watch_max_retries,
            ..Config::default()
        }
    }

    /// Build the test context
    pub async fn build(self) -> Result<TestCtx> {
        let config = self.config();
        let key = config.product_key();
        let kv = self.kv.unwrap_or_default();
        if let Some(products) = &self.products {
            kv.put(&key, products_value(products));
        }

        let store: Arc<dyn KvStore> = kv.clone();
        let (gateway, api) = api::mock::start(self.threads, config, store).await?;

        Ok(TestCtx {
            api,
            gateway,
            kv,
            key,
            authenticator: Authenticator::new(self.secret, self.scheme)?,
            drop_bomb: DropBomb,
        })
    }
}

/// Test context
pub struct TestCtx {
    /// API allowing to interact with the gateway
    pub api: Api,
    gateway: api::mock::MockGateway,
    /// The configuration store the gateway watches
    pub kv: Arc<MemoryKv>,
    /// The watched key
    pub key: String,
    /// Authenticator configured like the gateway's
    pub authenticator: Authenticator,
    drop_bomb: DropBomb,
}

impl TestCtx {
    /// The registry the gateway serves from
    pub fn registry(&self) -> &ProductRegistry {
        self.gateway.gateway().registry()
    }

    /// Signature of `user_id`
    pub fn sign(&self, user_id: u64) -> String {
        self.authenticator.sign(user_id)
    }

    /// Session of `user_id` with a valid signature
    pub fn user(&self, user_id: u64) -> UserSession<'_> {
        self.api.create_user_session(user_id, self.sign(user_id))
    }

    /// Store `products` and wait until the gateway serves them
    pub async fn publish(&self, products: &[Product]) -> Result<i64> {
        self.publish_raw(products_value(products)).await
    }

    /// Store a raw value and wait until the gateway has seen its revision
    ///
    /// Resolves once the registry serves the revision, or times out if the
    /// value is rejected. Use [`TestCtx::put`] for values expected to be
    /// rejected.
    pub async fn publish_raw(&self, value: impl Into<Vec<u8>>) -> Result<i64> {
        let revision = self.kv.put(&self.key, value);
        self.wait_for_revision(revision).await?;
        Ok(revision)
    }

    /// Store a raw value without waiting
    pub fn put(&self, value: impl Into<Vec<u8>>) -> i64 {
        self.kv.put(&self.key, value)
    }

    /// Wait until the registry serves a snapshot of at least `revision`
    pub async fn wait_for_revision(&self, revision: i64) -> Result<()> {
        wait_until(Duration::from_secs(10), || {
            self.registry().snapshot().revision() >= revision
        })
        .await
        .map_err(|_| eyre!("registry did not reach revision {revision}"))
    }

    /// Shut the gateway down and finish the test
    pub async fn finish(self) {
        std::mem::forget(self.drop_bomb);
        drop(self.api);
        self.gateway.shutdown().await;
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            return Err(eyre!("condition not met within {timeout:?}"));
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// Render `products` in the wire format of the product key
pub fn products_value(products: &[Product]) -> Vec<u8> {
    let records: Vec<_> = products
        .iter()
        .map(|p| {
            json!({
                "ProductId": p.product_id,
                "StartTime": p.start_time,
                "EndTime": p.end_time,
                "Status": match p.status {
                    ProductStatus::Normal => 0,
                    ProductStatus::SoldOut => 1,
                    ProductStatus::ForceSoldOut => 2,
                },
                "Count": p.count,
                "Left": p.left,
            })
        })
        .collect();
    serde_json::to_vec(&records).unwrap()
}

/// A product on sale from `start` to `end`
pub fn product(product_id: u64, start_time: i64, end_time: i64, status: ProductStatus) -> Product {
    Product {
        product_id,
        start_time,
        end_time,
        status,
        count: 100,
        left: 100,
    }
}

struct DropBomb;

impl Drop for DropBomb {
    fn drop(&mut self) {
        eprintln!("@TestAuthor: You should call `ctx.finish().await` to shut the gateway down");
    }
}
