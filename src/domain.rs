// ===============================
// src/domain.rs
// ===============================
//
// Kontrak data: sembilan jenis event posisi, envelope-nya, record yang
// disimpan di log, dan `Position` hasil proyeksi.
//
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Schema version written with every stored record.
pub const RECORD_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side { Long, Short }
impl Side { pub fn sign(&self) -> f64 { match self { Side::Long => 1.0, Side::Short => -1.0 } } }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource { System, User, Webhook }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopLossUpdateReason { Manual, Trailing, Breakeven, BandBased }

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason { Target, Stop, Manual, Timeout }

// ---- Payload per jenis event ----

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossLevel { pub price: f64, pub distance: f64, pub hit: bool }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitLevel { pub price: f64, pub percent: f64, pub hit: bool }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionOpened {
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub side: Side,
    pub stop_loss: StopLossLevel,
    pub take_profits: Vec<TakeProfitLevel>,
    pub confidence: f64,
    pub indicators: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitHit {
    pub tp_index: usize,
    pub tp_price: f64,
    pub fill_price: f64,
    pub closed_quantity: f64,
    pub remaining_quantity: f64,
    #[serde(default)]
    pub moved_sl_to_breakeven: bool,
    #[serde(default)]
    pub activated_trailing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossHit {
    pub sl_price: f64,
    pub fill_price: f64,
    pub closed_quantity: f64,
    pub pnl: f64,
    pub pnl_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossUpdated {
    pub old_sl_price: f64,
    pub new_sl_price: f64,
    pub reason: StopLossUpdateReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossToBreakeven {
    pub entry_price: f64,
    pub old_sl_price: f64,
    pub new_sl_price: f64,
    pub triggered_by_tp: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingStopActivated {
    pub trailing_distance: f64,
    pub high_price: f64,
    pub sl_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by_tp: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialClosed {
    pub closed_quantity: f64,
    pub remaining_quantity: f64,
    pub fill_price: f64,
    pub percent_closed: f64,
    pub reason: String,
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionClosed {
    pub fill_price: f64,
    pub quantity: f64,
    pub duration_ms: i64,
    pub targets_hit: usize,
    pub pnl: f64,
    pub pnl_percent: f64,
    pub reason: CloseReason,
}

/// Informational field changes (e.g. `unrealized_pnl`). Not state-defining.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdated {
    pub changes: BTreeMap<String, serde_json::Value>,
}

/// The closed set of event kinds, each variant carrying only its own fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    PositionOpened(PositionOpened),
    TakeProfitHit(TakeProfitHit),
    StopLossHit(StopLossHit),
    StopLossUpdated(StopLossUpdated),
    StopLossToBreakeven(StopLossToBreakeven),
    TrailingStopActivated(TrailingStopActivated),
    PartialClosed(PartialClosed),
    PositionClosed(PositionClosed),
    PositionUpdated(PositionUpdated),
}

/// Fieldless discriminator, handy for counting and labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    PositionOpened,
    TakeProfitHit,
    StopLossHit,
    StopLossUpdated,
    StopLossToBreakeven,
    TrailingStopActivated,
    PartialClosed,
    PositionClosed,
    PositionUpdated,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::PositionOpened => "POSITION_OPENED",
            EventKind::TakeProfitHit => "TAKE_PROFIT_HIT",
            EventKind::StopLossHit => "STOP_LOSS_HIT",
            EventKind::StopLossUpdated => "STOP_LOSS_UPDATED",
            EventKind::StopLossToBreakeven => "STOP_LOSS_TO_BREAKEVEN",
            EventKind::TrailingStopActivated => "TRAILING_STOP_ACTIVATED",
            EventKind::PartialClosed => "PARTIAL_CLOSED",
            EventKind::PositionClosed => "POSITION_CLOSED",
            EventKind::PositionUpdated => "POSITION_UPDATED",
        }
    }

    /// Kinds after which no further position activity is expected.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::StopLossHit | EventKind::PositionClosed)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::PositionOpened(_) => EventKind::PositionOpened,
            EventPayload::TakeProfitHit(_) => EventKind::TakeProfitHit,
            EventPayload::StopLossHit(_) => EventKind::StopLossHit,
            EventPayload::StopLossUpdated(_) => EventKind::StopLossUpdated,
            EventPayload::StopLossToBreakeven(_) => EventKind::StopLossToBreakeven,
            EventPayload::TrailingStopActivated(_) => EventKind::TrailingStopActivated,
            EventPayload::PartialClosed(_) => EventKind::PartialClosed,
            EventPayload::PositionClosed(_) => EventKind::PositionClosed,
            EventPayload::PositionUpdated(_) => EventKind::PositionUpdated,
        }
    }
}

/// Envelope shared by every event. `timestamp` is when the occurrence happened,
/// not when it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionEvent {
    pub position_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl PositionEvent {
    pub fn new(
        position_id: impl Into<String>,
        symbol: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            position_id: position_id.into(),
            symbol: symbol.into(),
            timestamp,
            source: EventSource::System,
            correlation_id: None,
            payload,
        }
    }

    pub fn with_source(mut self, source: EventSource) -> Self { self.source = source; self }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn kind(&self) -> EventKind { self.payload.kind() }
}

/// One line of the durable log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub event: PositionEvent,
    pub stored_at: DateTime<Utc>,
    pub version: u32,
}

impl EventRecord {
    /// Wraps an event with a fresh UUIDv7 id. The id is time-ordered by
    /// storage time and independent of the event's own timestamp.
    pub fn new(event: PositionEvent) -> Self {
        Self { id: Uuid::now_v7().to_string(), event, stored_at: Utc::now(), version: RECORD_VERSION }
    }
}

// ---- Proyeksi ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionStatus { Open, Closed }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossState {
    pub price: f64,
    pub initial_price: f64,
    pub is_breakeven: bool,
    pub is_trailing: bool,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TakeProfitState {
    /// 1-based level number.
    pub level: usize,
    /// Distance of the target from entry, in percent, in the position's favour.
    pub percent: f64,
    /// Share of the position closed at this target.
    pub size_percent: f64,
    pub price: f64,
    pub hit: bool,
}

/// Position state as rebuilt from events. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub symbol: String,
    pub status: PositionStatus,
    pub side: Side,
    pub quantity: f64,
    pub entry_price: f64,
    pub leverage: f64,
    /// Owned by the position-lifecycle layer; always 0 when projected.
    pub margin: f64,
    pub stop_loss: StopLossState,
    pub take_profits: Vec<TakeProfitState>,
    pub opened_at: DateTime<Utc>,
    pub unrealized_pnl: f64,
    /// Owned by the position-lifecycle layer; always `None` when projected.
    pub order_id: Option<String>,
    pub reason: String,
    pub confidence: f64,
}

impl Position {
    /// Initial state from a POSITION_OPENED event; `None` for any other kind.
    pub fn from_opening(event: &PositionEvent) -> Option<Self> {
        let EventPayload::PositionOpened(opened) = &event.payload else { return None };

        let take_profits = opened
            .take_profits
            .iter()
            .enumerate()
            .map(|(i, tp)| TakeProfitState {
                level: i + 1,
                percent: target_distance_percent(opened.entry_price, tp.price, opened.side),
                size_percent: tp.percent,
                price: tp.price,
                hit: tp.hit,
            })
            .collect();

        Some(Self {
            id: event.position_id.clone(),
            symbol: event.symbol.clone(),
            status: PositionStatus::Open,
            side: opened.side,
            quantity: opened.quantity,
            entry_price: opened.entry_price,
            leverage: opened.leverage,
            margin: 0.0,
            stop_loss: StopLossState {
                price: opened.stop_loss.price,
                initial_price: opened.stop_loss.price,
                is_breakeven: false,
                is_trailing: false,
                last_updated: event.timestamp,
            },
            take_profits,
            opened_at: event.timestamp,
            unrealized_pnl: 0.0,
            order_id: None,
            reason: opened.indicators.join(", "),
            confidence: opened.confidence,
        })
    }
}

fn target_distance_percent(entry: f64, target: f64, side: Side) -> f64 {
    if entry == 0.0 {
        return 0.0;
    }
    (target - entry) / entry * 100.0 * side.sign()
}
