//! Status evaluation of a product at a given instant
use seckill_core::{ErrorCode, Product, ProductInfo};

/// Status text of a product whose sale is running
pub const STATUS_RUNNING: &str = "success";
/// Status text of a product whose sale has not started
pub const STATUS_NOT_STARTED: &str = "sec kill is not start";
/// Status text of a product whose sale is over
pub const STATUS_ENDED: &str = "sec kill is already end";
/// Status text of a sold out product
pub const STATUS_SOLD_OUT: &str = "product is sale out";

/// Result of evaluating a product
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Verdict {
    /// Whether the sale is running
    pub start: bool,
    /// Whether the sale is over
    pub end: bool,
    /// Human readable status
    pub status: &'static str,
    /// Code reported by `/seckill`
    pub code: ErrorCode,
}

impl Verdict {
    /// Render the verdict for `/secinfo`
    pub fn into_info(self, product_id: u64) -> ProductInfo {
        ProductInfo {
            product_id,
            start: self.start,
            end: self.end,
            status: self.status.to_owned(),
        }
    }
}

/// Evaluate `product` at wall-clock second `now`
///
/// A sold out flag takes priority over the time window. The window bounds
/// are inclusive.
pub fn evaluate(product: &Product, now: i64) -> Verdict {
    if product.status.is_sold_out() {
        Verdict {
            start: false,
            end: true,
            status: STATUS_SOLD_OUT,
            code: ErrorCode::ActiveSoldOut,
        }
    } else if now < product.start_time {
        Verdict {
            start: false,
            end: false,
            status: STATUS_NOT_STARTED,
            code: ErrorCode::ActiveNotStarted,
        }
    } else if now > product.end_time {
        Verdict {
            start: false,
            end: true,
            status: STATUS_ENDED,
            code: ErrorCode::ActiveAlreadyEnded,
        }
    } else {
        Verdict {
            start: true,
            end: false,
            status: STATUS_RUNNING,
            code: ErrorCode::Ok,
        }
    }
}
