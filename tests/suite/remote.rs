//! Remote procedures against a live node

use std::collections::BTreeSet;

use opal_engine::{ClientConfig, Context, opal};
use opal_remote::{RemoteCall, RemoteClient, RemoteError, execute_at};
use pretty_assertions::assert_eq;

use crate::common::{builtin_registry, spawn_node};

async fn fill_locally(ctx: Context, n: u32, seed: Vec<i64>) -> anyhow::Result<BTreeSet<i64>> {
    let items = ctx.collection_from(seed);
    let child = {
        let items = items.clone();
        ctx.hypothetical(move |child_ctx| async move {
            for value in 0..n {
                child_ctx.add(&items, i64::from(value)).await?;
            }
            anyhow::Ok(())
        })
    };
    ctx.commit(&child).await?;
    Ok(ctx.view(&items)?)
}

#[tokio::test]
async fn square_publishes_into_the_callers_weight() {
    let base_url = spawn_node(builtin_registry()).await;
    let out = opal(move |ctx| async move {
        let input = ctx.weight::<i64>();
        let out = ctx.weight::<i64>();
        ctx.set(&input, -12).await?;
        execute_at(
            &ctx,
            &base_url,
            RemoteCall::new("square").bind("in", &input).bind("out", &out),
        )
        .await?;
        Ok(ctx.try_get(&out, ctx.world()).transpose()?)
    })
    .await
    .unwrap();
    assert_eq!(out, Some(144));
}

#[tokio::test]
async fn fill_range_matches_a_local_commit() {
    let base_url = spawn_node(builtin_registry()).await;
    let (remote, local) = opal(move |ctx| async move {
        let client = RemoteClient::new(&base_url, &ClientConfig::default())?;
        let n = ctx.weight::<u32>();
        ctx.set(&n, 4).await?;
        let items = ctx.collection_from([2_i64, 9]);
        client
            .execute(&ctx, RemoteCall::new("fill_range").bind("n", &n).bind("items", &items))
            .await?;
        let remote = ctx.view(&items)?;
        let local = fill_locally(ctx.clone(), 4, vec![2, 9]).await?;
        Ok((remote, local))
    })
    .await
    .unwrap();
    assert_eq!(remote, BTreeSet::from([0, 1, 2, 3, 9]));
    assert_eq!(remote, local);
}

#[tokio::test]
async fn unknown_procedure_is_a_client_error() {
    let base_url = spawn_node(builtin_registry()).await;
    let err = opal(move |ctx| async move {
        let out = ctx.weight::<i64>();
        let err = execute_at(&ctx, &base_url, RemoteCall::new("cube").bind("out", &out))
            .await
            .unwrap_err();
        assert!(ctx.try_get(&out, ctx.world()).is_none());
        anyhow::Ok(err)
    })
    .await
    .unwrap();
    match err {
        RemoteError::Status { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("cube"), "{message}");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_input_leaves_the_caller_untouched() {
    let base_url = spawn_node(builtin_registry()).await;
    let err = opal(move |ctx| async move {
        let input = ctx.weight::<i64>();
        let out = ctx.weight::<i64>();
        let err = execute_at(
            &ctx,
            &base_url,
            RemoteCall::new("square").bind("in", &input).bind("out", &out),
        )
        .await
        .unwrap_err();
        assert!(ctx.try_get(&out, ctx.world()).is_none());
        anyhow::Ok(err)
    })
    .await
    .unwrap();
    assert!(matches!(err, RemoteError::Status { status: 400, .. }), "{err:?}");
}
