//! Product registry: the current catalogue snapshot
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use seckill_core::Product;
use tracing::warn;

/// Immutable product mapping published as one unit
#[derive(Debug, Default)]
pub struct Snapshot {
    /// Store revision the snapshot was built from
    revision: i64,
    products: BTreeMap<u64, Product>,
}

impl Snapshot {
    /// Build a snapshot from decoded products
    ///
    /// If a product id appears more than once, the later record wins.
    pub fn new(revision: i64, products: Vec<Product>) -> Self {
        let mut map = BTreeMap::new();
        for product in products {
            if map.insert(product.product_id, product).is_some() {
                warn!(
                    product_id = product.product_id,
                    revision, "duplicate product id, keeping the later record"
                );
            }
        }
        Self {
            revision,
            products: map,
        }
    }

    /// Store revision the snapshot was built from
    #[inline]
    pub fn revision(&self) -> i64 {
        self.revision
    }

    /// Look a product up
    #[inline]
    pub fn get(&self, product_id: u64) -> Option<&Product> {
        self.products.get(&product_id)
    }

    /// All products ordered by id
    pub fn iter(&self) -> impl Iterator<Item = &Product> + '_ {
        self.products.values()
    }

    /// Number of products
    #[inline]
    pub fn len(&self) -> usize {
        self.products.len()
    }

    /// Whether the snapshot has no products
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Holds the current [`Snapshot`]
///
/// Readers clone the snapshot pointer under a shared lock and traverse it
/// without holding the lock; the writer replaces the pointer as a whole.
#[derive(Debug, Default)]
pub struct ProductRegistry {
    current: RwLock<Arc<Snapshot>>,
}

impl ProductRegistry {
    /// Create a registry holding an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a product up in the current snapshot
    pub fn lookup(&self, product_id: u64) -> Option<Product> {
        self.current.read().get(product_id).copied()
    }

    /// Get the current snapshot
    ///
    /// The returned snapshot stays consistent for as long as it is held,
    /// even if a newer one is published meanwhile.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Replace the current snapshot, returning the previous one
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        std::mem::replace(&mut *self.current.write(), snapshot)
    }
}
