//! Property tests for the projection fold.
//!
//! Uses proptest to verify:
//! 1. Determinism: folding the same events twice gives identical positions
//! 2. Temporal monotonicity: take-profit hits seen at time t stay hit at any later time
//! 3. Closed is absorbing: nothing after a close changes the projected state

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use position_journal::domain::{
    CloseReason, PartialClosed, PositionClosed, PositionOpened, StopLossLevel,
    StopLossUpdateReason, StopLossUpdated, TakeProfitHit, TakeProfitLevel,
    TrailingStopActivated,
};
use position_journal::projection::apply_events;
use position_journal::{EventPayload, Position, PositionEvent, PositionStatus, Side};

// ── Strategies (proptest) ────────────────────────────────────────────

fn at(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

fn opening() -> PositionEvent {
    PositionEvent::new(
        "pos-p",
        "XRPUSD",
        at(0),
        EventPayload::PositionOpened(PositionOpened {
            entry_price: 2.5,
            quantity: 100.0,
            leverage: 5.0,
            side: Side::Long,
            stop_loss: StopLossLevel { price: 2.4, distance: 0.1, hit: false },
            take_profits: vec![
                TakeProfitLevel { price: 2.6, percent: 50.0, hit: false },
                TakeProfitLevel { price: 2.7, percent: 30.0, hit: false },
                TakeProfitLevel { price: 2.8, percent: 20.0, hit: false },
            ],
            confidence: 75.0,
            indicators: vec![],
        }),
    )
}

fn arb_quantity() -> impl Strategy<Value = f64> {
    (0.0..100.0_f64).prop_map(|q| (q * 100.0).round() / 100.0)
}

fn arb_price() -> impl Strategy<Value = f64> {
    (2.0..3.0_f64).prop_map(|p| (p * 1000.0).round() / 1000.0)
}

fn arb_payload() -> impl Strategy<Value = EventPayload> {
    prop_oneof![
        (0usize..5, arb_quantity(), any::<bool>(), any::<bool>()).prop_map(|(idx, rem, be, tr)| {
            EventPayload::TakeProfitHit(TakeProfitHit {
                tp_index: idx,
                tp_price: 2.6,
                fill_price: 2.6,
                closed_quantity: 100.0 - rem,
                remaining_quantity: rem,
                moved_sl_to_breakeven: be,
                activated_trailing: tr,
            })
        }),
        (arb_price(), any::<bool>()).prop_map(|(price, trailing)| {
            EventPayload::StopLossUpdated(StopLossUpdated {
                old_sl_price: 2.4,
                new_sl_price: price,
                reason: if trailing { StopLossUpdateReason::Trailing } else { StopLossUpdateReason::Manual },
                context: None,
            })
        }),
        arb_price().prop_map(|price| {
            EventPayload::TrailingStopActivated(TrailingStopActivated {
                trailing_distance: 0.05,
                high_price: price + 0.05,
                sl_price: price,
                triggered_by_tp: None,
            })
        }),
        arb_quantity().prop_map(|rem| {
            EventPayload::PartialClosed(PartialClosed {
                closed_quantity: 100.0 - rem,
                remaining_quantity: rem,
                fill_price: 2.55,
                percent_closed: 100.0 - rem,
                reason: "manual".into(),
                pnl: 0.0,
            })
        }),
    ]
}

/// Events with non-decreasing timestamps after the opening.
fn arb_events() -> impl Strategy<Value = Vec<PositionEvent>> {
    prop::collection::vec((1i64..1_000, arb_payload()), 0..20).prop_map(|steps| {
        let mut ts = 0i64;
        steps
            .into_iter()
            .map(|(gap, payload)| {
                ts += gap;
                PositionEvent::new("pos-p", "XRPUSD", at(ts), payload)
            })
            .collect()
    })
}

fn initial() -> Position {
    Position::from_opening(&opening()).unwrap()
}

fn close_event(ms: i64) -> PositionEvent {
    PositionEvent::new(
        "pos-p",
        "XRPUSD",
        at(ms),
        EventPayload::PositionClosed(PositionClosed {
            fill_price: 2.6,
            quantity: 0.0,
            duration_ms: ms,
            targets_hit: 0,
            pnl: 0.0,
            pnl_percent: 0.0,
            reason: CloseReason::Timeout,
        }),
    )
}

// ── 1. Determinism ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn fold_is_deterministic(events in arb_events()) {
        let first = apply_events(initial(), &events);
        let second = apply_events(initial(), &events);
        prop_assert_eq!(first, second);
    }
}

// ── 2. Temporal monotonicity ─────────────────────────────────────────

proptest! {
    #[test]
    fn hit_targets_stay_hit(events in arb_events(), cut in 0usize..20) {
        let cut = cut.min(events.len());
        let earlier = apply_events(initial(), &events[..cut]);
        let later = apply_events(initial(), &events);
        for (before, after) in earlier.take_profits.iter().zip(later.take_profits.iter()) {
            prop_assert!(!before.hit || after.hit);
        }
        prop_assert!(!earlier.stop_loss.is_breakeven || later.stop_loss.is_breakeven);
        prop_assert!(!earlier.stop_loss.is_trailing || later.stop_loss.is_trailing);
    }
}

// ── 3. Closed is absorbing ───────────────────────────────────────────

proptest! {
    #[test]
    fn nothing_changes_after_close(events in arb_events(), tail in arb_events()) {
        let mut closed_run = events.clone();
        closed_run.push(close_event(10_000_000));
        let closed = apply_events(initial(), &closed_run);
        prop_assert_eq!(closed.status, PositionStatus::Closed);
        prop_assert_eq!(closed.quantity, 0.0);

        closed_run.extend(tail);
        let with_tail = apply_events(initial(), &closed_run);
        prop_assert_eq!(with_tail, closed);
    }
}
