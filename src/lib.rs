// ===============================
// src/lib.rs
// ===============================
pub mod config;
pub mod domain;
pub mod emitter;
pub mod error;
pub mod lifecycle;
pub mod metrics;
pub mod projection;
pub mod store;

pub use domain::{EventKind, EventPayload, EventRecord, PositionEvent, Position, PositionStatus, Side};
pub use emitter::{EventEmitter, PositionOpening, StopLossPlan, TakeProfitFill, TakeProfitPlan};
pub use error::EventLogError;
pub use lifecycle::{reset_shared_instance, shared_instance, EventSourcing};
pub use projection::{LifecycleStatus, SequenceValidation, SequenceViolation, StateProjection};
pub use store::{EventStore, LoadReport, StoreOptions, StoreStatistics};
