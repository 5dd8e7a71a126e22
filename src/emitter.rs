// ===============================
// src/emitter.rs
// ===============================
//
// API tulis: satu method per jenis event. Producer cukup memberi field bisnis;
// envelope (timestamp = now, source = system) diisi di sini lalu diteruskan ke
// EventStore::append. Error dari store diteruskan apa adanya (tanpa retry).
//
use std::sync::Arc;

use chrono::Utc;

use crate::domain::{
    EventPayload, EventRecord, PartialClosed, PositionClosed, PositionEvent, PositionOpened,
    PositionUpdated, Side, StopLossHit, StopLossLevel, StopLossToBreakeven, StopLossUpdateReason,
    StopLossUpdated, TakeProfitHit, TakeProfitLevel, TrailingStopActivated,
};
use crate::error::Result;
use crate::store::EventStore;

/// Initial stop as planned at entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopLossPlan { pub price: f64, pub distance: f64 }

/// One take-profit target: price and share of the position to close there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TakeProfitPlan { pub price: f64, pub percent: f64 }

#[derive(Debug, Clone, PartialEq)]
pub struct PositionOpening {
    pub entry_price: f64,
    pub quantity: f64,
    pub leverage: f64,
    pub side: Side,
    pub stop_loss: StopLossPlan,
    pub take_profits: Vec<TakeProfitPlan>,
    pub confidence: f64,
    pub indicators: Vec<String>,
}

/// A take-profit fill. Omitted side-effect flags count as `false`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TakeProfitFill {
    pub tp_index: usize,
    pub tp_price: f64,
    pub fill_price: f64,
    pub closed_quantity: f64,
    pub remaining_quantity: f64,
    pub moved_sl_to_breakeven: Option<bool>,
    pub activated_trailing: Option<bool>,
}

#[derive(Clone)]
pub struct EventEmitter {
    store: Arc<EventStore>,
    correlation_id: Option<String>,
}

impl EventEmitter {
    pub fn new(store: Arc<EventStore>) -> Self { Self { store, correlation_id: None } }

    /// Emitter that tags every event it writes with `correlation_id`.
    pub fn with_correlation_id(&self, correlation_id: impl Into<String>) -> Self {
        Self { store: self.store.clone(), correlation_id: Some(correlation_id.into()) }
    }

    async fn emit(&self, position_id: &str, symbol: &str, payload: EventPayload) -> Result<EventRecord> {
        let mut event = PositionEvent::new(position_id, symbol, Utc::now(), payload);
        event.correlation_id = self.correlation_id.clone();
        self.store.append(event).await
    }

    pub async fn position_opened(
        &self,
        position_id: &str,
        symbol: &str,
        opening: PositionOpening,
    ) -> Result<EventRecord> {
        let payload = PositionOpened {
            entry_price: opening.entry_price,
            quantity: opening.quantity,
            leverage: opening.leverage,
            side: opening.side,
            stop_loss: StopLossLevel {
                price: opening.stop_loss.price,
                distance: opening.stop_loss.distance,
                hit: false,
            },
            take_profits: opening
                .take_profits
                .iter()
                .map(|tp| TakeProfitLevel { price: tp.price, percent: tp.percent, hit: false })
                .collect(),
            confidence: opening.confidence,
            indicators: opening.indicators,
        };
        self.emit(position_id, symbol, EventPayload::PositionOpened(payload)).await
    }

    pub async fn take_profit_hit(
        &self,
        position_id: &str,
        symbol: &str,
        fill: TakeProfitFill,
    ) -> Result<EventRecord> {
        let payload = TakeProfitHit {
            tp_index: fill.tp_index,
            tp_price: fill.tp_price,
            fill_price: fill.fill_price,
            closed_quantity: fill.closed_quantity,
            remaining_quantity: fill.remaining_quantity,
            moved_sl_to_breakeven: fill.moved_sl_to_breakeven.unwrap_or(false),
            activated_trailing: fill.activated_trailing.unwrap_or(false),
        };
        self.emit(position_id, symbol, EventPayload::TakeProfitHit(payload)).await
    }

    pub async fn stop_loss_hit(&self, position_id: &str, symbol: &str, hit: StopLossHit) -> Result<EventRecord> {
        self.emit(position_id, symbol, EventPayload::StopLossHit(hit)).await
    }

    pub async fn stop_loss_updated(
        &self,
        position_id: &str,
        symbol: &str,
        old_sl_price: f64,
        new_sl_price: f64,
        reason: StopLossUpdateReason,
        context: Option<String>,
    ) -> Result<EventRecord> {
        let payload = StopLossUpdated { old_sl_price, new_sl_price, reason, context };
        self.emit(position_id, symbol, EventPayload::StopLossUpdated(payload)).await
    }

    pub async fn stop_loss_to_breakeven(
        &self,
        position_id: &str,
        symbol: &str,
        entry_price: f64,
        old_sl_price: f64,
        triggered_by_tp: usize,
    ) -> Result<EventRecord> {
        let payload = StopLossToBreakeven {
            entry_price,
            old_sl_price,
            new_sl_price: entry_price,
            triggered_by_tp,
        };
        self.emit(position_id, symbol, EventPayload::StopLossToBreakeven(payload)).await
    }

    pub async fn trailing_stop_activated(
        &self,
        position_id: &str,
        symbol: &str,
        activation: TrailingStopActivated,
    ) -> Result<EventRecord> {
        self.emit(position_id, symbol, EventPayload::TrailingStopActivated(activation)).await
    }

    pub async fn partial_closed(&self, position_id: &str, symbol: &str, partial: PartialClosed) -> Result<EventRecord> {
        self.emit(position_id, symbol, EventPayload::PartialClosed(partial)).await
    }

    pub async fn position_closed(&self, position_id: &str, symbol: &str, close: PositionClosed) -> Result<EventRecord> {
        self.emit(position_id, symbol, EventPayload::PositionClosed(close)).await
    }

    pub async fn position_updated(
        &self,
        position_id: &str,
        symbol: &str,
        changes: PositionUpdated,
    ) -> Result<EventRecord> {
        self.emit(position_id, symbol, EventPayload::PositionUpdated(changes)).await
    }
}
