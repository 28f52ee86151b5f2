//! Procedures every node ships with.

use anyhow::Context as _;
use opal_engine::Context;

use crate::RemoteError;
use crate::args::RemoteArgs;
use crate::registry::{ProcedureFut, ProcedureRegistry, RemoteProcedure};

pub fn register_builtins(registry: &mut ProcedureRegistry) -> Result<(), RemoteError> {
    registry.register(Box::new(Square))?;
    registry.register(Box::new(FillRange))?;
    Ok(())
}

/// Publishes `in * in` into weight `out`.
pub struct Square;

impl RemoteProcedure for Square {
    fn name(&self) -> &'static str {
        "square"
    }

    fn description(&self) -> &'static str {
        "Set weight `out` to the square of weight `in`."
    }

    fn call(&self, ctx: Context, args: RemoteArgs) -> ProcedureFut {
        Box::pin(square(ctx, args))
    }
}

async fn square(ctx: Context, args: RemoteArgs) -> anyhow::Result<()> {
    let input = args.weight::<i64>("in")?;
    let out = args.weight::<i64>("out")?;
    let value = *input.require_input()?;
    let squared = value
        .checked_mul(value)
        .with_context(|| format!("{value} squared overflows i64"))?;
    ctx.set(out.handle(), squared).await?;
    Ok(())
}

/// Adds `0..n` to collection `items`.
pub struct FillRange;

impl RemoteProcedure for FillRange {
    fn name(&self) -> &'static str {
        "fill_range"
    }

    fn description(&self) -> &'static str {
        "Add the integers 0..n (weight `n`) to collection `items`."
    }

    fn call(&self, ctx: Context, args: RemoteArgs) -> ProcedureFut {
        Box::pin(fill_range(ctx, args))
    }
}

async fn fill_range(ctx: Context, args: RemoteArgs) -> anyhow::Result<()> {
    let n = args.weight::<u32>("n")?;
    let items = args.collection::<i64>("items")?;
    for value in 0..*n.require_input()? {
        ctx.add(&items, i64::from(value)).await?;
    }
    Ok(())
}
