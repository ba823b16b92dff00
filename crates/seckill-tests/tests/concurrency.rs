use std::collections::BTreeSet;
use std::iter;

use eyre::Result;
use futures::future::join_all;
use seckill_core::{ErrorCode, Product, ProductStatus};
use seckill_tests::{product, products_value, Api, TestCtxBuilder};
use util::{catalogue, END, PRODUCT_ID, START};

mod util;

/// One handle per client, spread over the worker threads
fn spread(api: &Api, clients: usize) -> Vec<Api> {
    iter::successors(Some(api.clone()), |api| Some(api.clone()))
        .take(clients)
        .collect()
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn parallel_clients_share_one_limit() -> Result<()> {
    for (clients, per_client, limit) in [(8usize, 10usize, 20u32), (8, 10, 100), (4, 1, 4)] {
        let ctx = TestCtxBuilder::new()
            .with_threads(8)
            .with_limit(limit)
            .with_products(catalogue(ProductStatus::Normal))
            .build()
            .await?;
        let sign = ctx.sign(42);

        let requests = spread(&ctx.api, clients).into_iter().map(|api| {
            let sign = sign.clone();
            async move {
                let session = api.create_user_session(42, sign);
                let mut codes = Vec::with_capacity(per_client);
                for _ in 0..per_client {
                    codes.push(session.seckill(PRODUCT_ID, 1500).await?.kind());
                }
                eyre::Ok(codes)
            }
        });

        let mut accepted = 0;
        let mut throttled = 0;
        for codes in join_all(requests).await {
            for code in codes? {
                match code {
                    Some(ErrorCode::Ok) => accepted += 1,
                    Some(ErrorCode::ServiceBusy) => throttled += 1,
                    other => panic!("unexpected code {other:?}"),
                }
            }
        }
        let total = clients * per_client;
        assert_eq!(accepted, total.min(limit as usize), "limit {limit}");
        assert_eq!(accepted + throttled, total);

        ctx.finish().await;
    }
    Ok(())
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn distinct_users_do_not_interfere() -> Result<()> {
    let ctx = TestCtxBuilder::new()
        .with_threads(4)
        .with_limit(1)
        .with_products(catalogue(ProductStatus::Normal))
        .build()
        .await?;

    let sessions: Vec<_> = (0..64)
        .map(|_| ctx.api.create_random_user_session(|user| ctx.sign(user)))
        .collect();
    let replies = join_all(sessions.iter().map(|s| s.seckill(PRODUCT_ID, 1500))).await;
    for reply in replies {
        util::assert_code(&reply?, ErrorCode::Ok);
    }

    drop(sessions);
    ctx.finish().await;
    Ok(())
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn readers_never_observe_a_mixed_snapshot() -> Result<()> {
    let catalogues: Vec<Vec<Product>> = vec![
        (1..=20)
            .map(|id| product(id, START, END, ProductStatus::Normal))
            .collect(),
        (21..=40)
            .map(|id| product(id, START, END, ProductStatus::SoldOut))
            .collect(),
        (1..=40)
            .step_by(3)
            .map(|id| product(id, START, END, ProductStatus::Normal))
            .collect(),
    ];
    let id_sets: Vec<BTreeSet<u64>> = catalogues
        .iter()
        .map(|c| c.iter().map(|p| p.product_id).collect())
        .collect();

    let ctx = TestCtxBuilder::new()
        .with_threads(8)
        .with_products(catalogues[0].clone())
        .build()
        .await?;

    let kv = ctx.kv.clone();
    let key = ctx.key.clone();
    let values: Vec<Vec<u8>> = catalogues.iter().map(|c| products_value(c)).collect();
    let writer = tokio::task::spawn_blocking(move || {
        let mut last = 0;
        for i in 0..300 {
            last = kv.put(&key, values[i % values.len()].clone());
        }
        last
    });

    let readers = spread(&ctx.api, 8).into_iter().map(|api| async move {
        let mut seen = Vec::new();
        for _ in 0..50 {
            let reply = api.sec_info(None, 1500).await?;
            let ids: BTreeSet<u64> = reply
                .data
                .unwrap_or_default()
                .into_iter()
                .map(|info| info.product_id)
                .collect();
            seen.push(ids);
        }
        eyre::Ok(seen)
    });

    for seen in join_all(readers).await {
        for ids in seen? {
            assert!(
                id_sets.contains(&ids),
                "observed a product set that was never published: {ids:?}"
            );
        }
    }

    let last = writer.await?;
    ctx.wait_for_revision(last).await?;
    let ids: BTreeSet<u64> = ctx.registry().snapshot().iter().map(|p| p.product_id).collect();
    assert_eq!(ids, id_sets[(300 - 1) % id_sets.len()]);

    ctx.finish().await;
    Ok(())
}
