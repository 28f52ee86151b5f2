//! Scheduling a meeting by exploring hypothetical calendars

use std::collections::BTreeSet;

use opal_engine::{Collection, Context, EngineError, LocalFut, Weight, World, opal};
use pretty_assertions::assert_eq;

use crate::common::{FakeCalendar, Meeting};

const PREFERRED_HOUR: u32 = 10;

/// One candidate: book `title` at `hour`, then publish how bad that is.
fn try_slot(
    calendar: &Collection<Meeting>,
    cost: &Weight<u32>,
    hour: u32,
) -> impl FnOnce(Context) -> LocalFut<'static, anyhow::Result<()>> + 'static {
    let (calendar, cost) = (calendar.clone(), cost.clone());
    move |ctx: Context| {
        Box::pin(async move {
            let before = ctx.clean_view(&calendar)?;
            ctx.add(&calendar, Meeting::draft(hour, "review")).await?;
            let clashes = before.iter().filter(|m| m.hour == hour).count() as u32;
            ctx.set(&cost, clashes * 100 + hour.abs_diff(PREFERRED_HOUR)).await?;
            Ok(())
        })
    }
}

#[tokio::test]
async fn best_slot_is_booked_through_the_calendar() {
    let (sink, batches) = FakeCalendar::new();
    let booked = opal(move |ctx| async move {
        let calendar = ctx.external_collection([Meeting::booked(10, "standup", 100)], sink);
        let cost = ctx.weight::<u32>();

        let candidates: Vec<World> = ctx
            .explore(8..13, |hour| try_slot(&calendar, &cost, hour))
            .collect();
        let best = ctx.minimize(candidates.clone(), &cost, None).await?;

        // Exploring touched nothing real.
        assert_eq!(ctx.view(&calendar)?.len(), 1);
        let preview = ctx.diff_child(&best, &calendar)?;
        assert_eq!(preview.len(), 1);

        ctx.commit(&best).await?;
        Ok(ctx.view(&calendar)?)
    })
    .await
    .unwrap();

    // 10 clashes with standup; 9 and 11 tie and 9 was enumerated first.
    assert_eq!(
        booked,
        BTreeSet::from([Meeting::booked(9, "review", 1), Meeting::booked(10, "standup", 100)])
    );
    assert_eq!(batches.borrow().len(), 1);
    assert_eq!(batches.borrow()[0].len(), 1);
}

#[tokio::test]
async fn losing_candidates_never_reach_the_calendar() {
    let (sink, batches) = FakeCalendar::new();
    opal(move |ctx| async move {
        let calendar = ctx.external_collection(Vec::new(), sink);
        let cost = ctx.weight::<u32>();
        let ranked = ctx
            .minimize_k(
                ctx.explore(8..13, |hour| try_slot(&calendar, &cost, hour)),
                &cost,
                2,
                Some(4),
            )
            .await?;
        assert_eq!(ranked.len(), 2);
        assert!(ctx.view(&calendar)?.is_empty());
        Ok(())
    })
    .await
    .unwrap();
    assert!(batches.borrow().is_empty());
}

#[tokio::test]
async fn rejected_booking_fails_the_commit() {
    let err = opal(|ctx| async move {
        let calendar = ctx.external_collection(Vec::new(), FakeCalendar::rejecting());
        let cost = ctx.weight::<u32>();
        let child = ctx.hypothetical(try_slot(&calendar, &cost, 9));
        let err = ctx.commit(&child).await.unwrap_err();
        assert!(ctx.view(&calendar)?.is_empty());
        Ok(err)
    })
    .await
    .unwrap();
    assert!(matches!(err, EngineError::Sink { .. }));
}

#[tokio::test]
async fn committed_siblings_chain_in_commit_order() {
    let (sink, batches) = FakeCalendar::new();
    let booked = opal(move |ctx| async move {
        let calendar = ctx.external_collection(Vec::new(), sink);
        let cost = ctx.weight::<u32>();
        let late = ctx.hypothetical(try_slot(&calendar, &cost, 15));
        let early = ctx.hypothetical(try_slot(&calendar, &cost, 9));
        ctx.commit(&late).await?;
        ctx.commit(&early).await?;
        Ok(ctx.view(&calendar)?)
    })
    .await
    .unwrap();

    assert_eq!(
        booked,
        BTreeSet::from([Meeting::booked(9, "review", 2), Meeting::booked(15, "review", 1)])
    );
    assert_eq!(batches.borrow().len(), 2);
}
