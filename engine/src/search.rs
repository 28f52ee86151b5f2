//! Enumerating and ranking hypothetical worlds.

use std::cmp::Ordering;
use std::future::Future;

use crate::{Context, EngineError, Weight, World};

impl Context {
    /// Lazily spawn one child per domain value. A child is only created when the
    /// iterator is advanced, and its body only runs once the child is acquired.
    pub fn explore<D, F, B, Fut>(&self, domain: D, mut factory: F) -> impl Iterator<Item = World> + use<D, F, B, Fut>
    where
        D: IntoIterator,
        F: FnMut(D::Item) -> B,
        B: FnOnce(Context) -> Fut + 'static,
        Fut: Future<Output = anyhow::Result<()>> + 'static,
    {
        let ctx = self.clone();
        domain
            .into_iter()
            .map(move |value| ctx.hypothetical(factory(value)))
    }

    /// The `k` worlds with the smallest weight, examining at most `limit` of them.
    ///
    /// Each examined world is forced through [`Context::get`]. Worlds whose body
    /// fails or never publishes are skipped, as are weights not comparable to
    /// themselves (NaN). Any other error aborts the search.
    /// Ties keep enumeration order.
    pub async fn minimize_k<W, I>(
        &self,
        worlds: I,
        weight: &Weight<W>,
        k: usize,
        limit: Option<usize>,
    ) -> Result<Vec<World>, EngineError>
    where
        W: PartialOrd + Clone + 'static,
        I: IntoIterator<Item = World>,
    {
        let mut scored: Vec<(W, World)> = Vec::new();
        let mut examined = 0usize;
        // `take` keeps the iterator from spawning a world past the limit.
        for world in worlds.into_iter().take(limit.unwrap_or(usize::MAX)) {
            examined += 1;
            match self.get(weight, &world).await {
                // NaN would break the sort's total order.
                Ok(score) if score.partial_cmp(&score).is_none() => {
                    tracing::warn!(world = %world.id(), "skipping candidate with incomparable weight");
                }
                Ok(score) => scored.push((score, world)),
                Err(err) if err.is_branch_failure() => {
                    tracing::warn!(world = %world.id(), error = %err, "skipping failed candidate");
                }
                Err(err) => return Err(err),
            }
        }

        if scored.is_empty() {
            return Err(EngineError::EmptySearch);
        }
        scored.sort_by(|(a, _), (b, _)| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        tracing::debug!(examined, scored = scored.len(), k, "search ranked");
        Ok(scored.into_iter().take(k).map(|(_, world)| world).collect())
    }

    pub async fn minimize<W, I>(&self, worlds: I, weight: &Weight<W>, limit: Option<usize>) -> Result<World, EngineError>
    where
        W: PartialOrd + Clone + 'static,
        I: IntoIterator<Item = World>,
    {
        self.minimize_k(worlds, weight, 1, limit)
            .await?
            .into_iter()
            .next()
            .ok_or(EngineError::EmptySearch)
    }
}
