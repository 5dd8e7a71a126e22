// ===============================
// src/projection.rs (state projection & sequence validation)
// ===============================
//
// Position tidak pernah disimpan: setiap pemanggilan proyeksi membangun ulang
// state dari event, dalam urutan datang (append order). Dua event dengan
// timestamp sama diterapkan sesuai urutan append.
//
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::domain::{
    EventKind, EventPayload, Position, PositionEvent, PositionStatus, StopLossUpdateReason,
};
use crate::metrics::SEQUENCE_VIOLATIONS;
use crate::store::EventStore;

/// Lifecycle status as seen from the raw event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus { Open, Closed, Invalid }

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SequenceViolation {
    FirstEventNotOpened { kind: EventKind },
    DuplicateOpened { count: usize },
    EventAfterClose { index: usize, kind: EventKind, closed_by: EventKind },
    DuplicateStopLossHit { count: usize },
    TimestampRegression { index: usize, previous: DateTime<Utc>, current: DateTime<Utc> },
}

impl SequenceViolation {
    fn rule(&self) -> &'static str {
        match self {
            SequenceViolation::FirstEventNotOpened { .. } => "first_event",
            SequenceViolation::DuplicateOpened { .. } => "duplicate_opened",
            SequenceViolation::EventAfterClose { .. } => "after_close",
            SequenceViolation::DuplicateStopLossHit { .. } => "duplicate_stop_loss_hit",
            SequenceViolation::TimestampRegression { .. } => "timestamp_order",
        }
    }
}

impl fmt::Display for SequenceViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceViolation::FirstEventNotOpened { kind } => {
                write!(f, "first event must be POSITION_OPENED, found {kind}")
            }
            SequenceViolation::DuplicateOpened { count } => {
                write!(f, "POSITION_OPENED appears {count} times")
            }
            SequenceViolation::EventAfterClose { index, kind, closed_by } => {
                write!(f, "event {index} ({kind}) occurs after position was closed by {closed_by}")
            }
            SequenceViolation::DuplicateStopLossHit { count } => {
                write!(f, "STOP_LOSS_HIT appears {count} times")
            }
            SequenceViolation::TimestampRegression { index, previous, current } => {
                write!(f, "event {index} timestamp {current} is earlier than previous {previous}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceValidation {
    pub valid: bool,
    pub errors: Vec<SequenceViolation>,
}

/// Checks every sequence rule and collects all violations. An empty list is valid.
///
/// STOP_LOSS_HIT and POSITION_CLOSED both end a position. The only event allowed
/// after a STOP_LOSS_HIT is the POSITION_CLOSED that settles it.
pub fn validate_events(events: &[PositionEvent]) -> SequenceValidation {
    let mut errors = Vec::new();

    if let Some(first) = events.first() {
        if first.kind() != EventKind::PositionOpened {
            errors.push(SequenceViolation::FirstEventNotOpened { kind: first.kind() });
        }
    }

    let opened = events.iter().filter(|e| e.kind() == EventKind::PositionOpened).count();
    if opened > 1 {
        errors.push(SequenceViolation::DuplicateOpened { count: opened });
    }

    let mut closed_by: Option<EventKind> = None;
    for (index, ev) in events.iter().enumerate() {
        let kind = ev.kind();
        match closed_by {
            Some(EventKind::StopLossHit) if kind == EventKind::PositionClosed => {
                closed_by = Some(EventKind::PositionClosed);
            }
            Some(by) => errors.push(SequenceViolation::EventAfterClose { index, kind, closed_by: by }),
            None if kind.is_terminal() => closed_by = Some(kind),
            None => {}
        }
    }

    let stop_hits = events.iter().filter(|e| e.kind() == EventKind::StopLossHit).count();
    if stop_hits > 1 {
        errors.push(SequenceViolation::DuplicateStopLossHit { count: stop_hits });
    }

    for (i, pair) in events.windows(2).enumerate() {
        if pair[1].timestamp < pair[0].timestamp {
            errors.push(SequenceViolation::TimestampRegression {
                index: i + 1,
                previous: pair[0].timestamp,
                current: pair[1].timestamp,
            });
        }
    }

    SequenceValidation { valid: errors.is_empty(), errors }
}

/// Applies one event to the running state. Never fails: an event that refers
/// to a missing take-profit level changes nothing on that level.
///
/// CLOSED is absorbing. Events appended after a stop-out or close are left to
/// `validate_events` to report and do not touch the state.
pub fn apply_event(position: &mut Position, event: &PositionEvent) {
    if position.status == PositionStatus::Closed {
        return;
    }
    match &event.payload {
        // Opening is the initial state; a repeated one is a validation issue.
        EventPayload::PositionOpened(_) => {}
        EventPayload::TakeProfitHit(tp) => {
            if let Some(level) = position.take_profits.get_mut(tp.tp_index) {
                level.hit = true;
            }
            position.quantity = tp.remaining_quantity;
            if tp.moved_sl_to_breakeven {
                position.stop_loss.price = position.entry_price;
                position.stop_loss.is_breakeven = true;
                position.stop_loss.last_updated = event.timestamp;
            }
            if tp.activated_trailing {
                position.stop_loss.is_trailing = true;
                position.stop_loss.last_updated = event.timestamp;
            }
        }
        EventPayload::StopLossHit(_) => {
            position.quantity = 0.0;
            position.status = PositionStatus::Closed;
        }
        EventPayload::StopLossUpdated(upd) => {
            position.stop_loss.price = upd.new_sl_price;
            if upd.new_sl_price == position.entry_price {
                position.stop_loss.is_breakeven = true;
            }
            if upd.reason == StopLossUpdateReason::Trailing {
                position.stop_loss.is_trailing = true;
            }
            position.stop_loss.last_updated = event.timestamp;
        }
        EventPayload::StopLossToBreakeven(be) => {
            position.stop_loss.price = be.new_sl_price;
            position.stop_loss.is_breakeven = true;
            position.stop_loss.last_updated = event.timestamp;
        }
        EventPayload::TrailingStopActivated(tr) => {
            position.stop_loss.is_trailing = true;
            position.stop_loss.price = tr.sl_price;
            position.stop_loss.last_updated = event.timestamp;
        }
        EventPayload::PartialClosed(pc) => {
            position.quantity = pc.remaining_quantity;
        }
        EventPayload::PositionClosed(_) => {
            position.status = PositionStatus::Closed;
            position.quantity = 0.0;
        }
        // TODO: decide whether unrealized_pnl from POSITION_UPDATED belongs in the projection
        EventPayload::PositionUpdated(_) => {}
    }
}

/// Folds events over an initial state. Pure: same input, same output.
pub fn apply_events<'a, I>(initial: Position, events: I) -> Position
where
    I: IntoIterator<Item = &'a PositionEvent>,
{
    events.into_iter().fold(initial, |mut position, event| {
        apply_event(&mut position, event);
        position
    })
}

/// Opening event plus everything else, in order. `None` without an opening.
fn fold_sequence(events: &[PositionEvent]) -> Option<Position> {
    let (open_idx, opening) = events
        .iter()
        .enumerate()
        .find(|(_, e)| e.kind() == EventKind::PositionOpened)?;
    let initial = Position::from_opening(opening)?;
    let rest = events
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != open_idx)
        .map(|(_, e)| e);
    Some(apply_events(initial, rest))
}

/// Read side over a shared store. Never mutates the log.
#[derive(Clone)]
pub struct StateProjection {
    store: Arc<EventStore>,
}

impl StateProjection {
    pub fn new(store: Arc<EventStore>) -> Self { Self { store } }

    pub fn project_position(&self, position_id: &str) -> Option<Position> {
        fold_sequence(&self.store.position_events(position_id))
    }

    /// State as of `at`: only events with timestamp <= `at` take part.
    pub fn project_position_at(&self, position_id: &str, at: DateTime<Utc>) -> Option<Position> {
        let events: Vec<PositionEvent> = self
            .store
            .position_events(position_id)
            .into_iter()
            .filter(|e| e.timestamp <= at)
            .collect();
        fold_sequence(&events)
    }

    pub fn project_symbol_positions(&self, symbol: &str) -> BTreeMap<String, Position> {
        let mut ids: Vec<String> = Vec::new();
        for ev in self.store.symbol_events(symbol) {
            if !ids.contains(&ev.position_id) {
                ids.push(ev.position_id);
            }
        }
        ids.into_iter()
            .filter_map(|id| self.project_position(&id).map(|p| (id, p)))
            .collect()
    }

    pub fn apply_events(&self, initial: Position, events: &[PositionEvent]) -> Position {
        apply_events(initial, events)
    }

    pub fn position_status(&self, position_id: &str) -> LifecycleStatus {
        let events = self.store.position_events(position_id);
        if events.is_empty() {
            LifecycleStatus::Invalid
        } else if events.iter().any(|e| e.kind() == EventKind::PositionClosed) {
            LifecycleStatus::Closed
        } else {
            LifecycleStatus::Open
        }
    }

    pub fn validate_event_sequence(&self, position_id: &str) -> SequenceValidation {
        let result = validate_events(&self.store.position_events(position_id));
        for violation in &result.errors {
            SEQUENCE_VIOLATIONS.with_label_values(&[violation.rule()]).inc();
        }
        result
    }

    /// Validates every known position; returns only the ones with violations.
    pub fn audit(&self) -> Vec<(String, SequenceValidation)> {
        let mut failed = Vec::new();
        for id in self.store.position_ids() {
            let result = self.validate_event_sequence(&id);
            if !result.valid {
                let errors: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
                warn!(position_id = %id, ?errors, "projection: invalid event sequence");
                failed.push((id, result));
            }
        }
        failed
    }
}
