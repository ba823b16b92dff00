use eyre::Result;
use seckill_core::{ErrorCode, ProductStatus, Reply};
use seckill_tests::{product, TestCtx};

/// Product used by most scenarios
pub const PRODUCT_ID: u64 = 1028;
/// Start of the sale of [`PRODUCT_ID`]
pub const START: i64 = 1000;
/// End of the sale of [`PRODUCT_ID`]
pub const END: i64 = 2000;

/// The catalogue with only [`PRODUCT_ID`], in `status`
#[allow(unused)]
pub fn catalogue(status: ProductStatus) -> Vec<seckill_core::Product> {
    vec![product(PRODUCT_ID, START, END, status)]
}

/// Assert that `reply` carries `code`
#[allow(unused)]
pub fn assert_code(reply: &Reply, code: ErrorCode) {
    assert_eq!(
        reply.kind(),
        Some(code),
        "expected {code:?} ({}), got {reply:?}",
        code.code()
    );
}

/// Ids listed by `/secinfo` at `now`, in order
#[allow(unused)]
pub async fn listed_ids(ctx: &TestCtx, now: i64) -> Result<Vec<u64>> {
    let reply = ctx.api.sec_info(None, now).await?;
    assert_code(&reply, ErrorCode::Ok);
    Ok(reply
        .data
        .unwrap_or_default()
        .into_iter()
        .map(|info| info.product_id)
        .collect())
}
