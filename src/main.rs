// ===============================
// src/main.rs
// ===============================
/*
 # audit log default (data/events/position-events.jsonl)
 cargo run --release

 # log lain + dump metrics
 EVENT_LOG_PATH=/var/lib/journal/events.jsonl PRINT_METRICS=1 cargo run --release
*/
/*
=============================================================================
Project : position_journal — append-only position event log in Rust
Module  : main.rs
Version : 0.1.0
Author  : Kukuh Tripamungkas Wicaksono (Kukuh TW)
Email   : kukuhtw@gmail.com
WhatsApp: https://wa.me/628129893706
LinkedIn: https://id.linkedin.com/in/kukuhtw
License : MIT (see LICENSE)

Summary : Records every position lifecycle event (open, take-profit, stop
          changes, partial/final close) to a durable JSONL log, rebuilds
          current or point-in-time position state by replay, and validates
          event sequences.

(c) 2025 Kukuh TW. All rights reserved where applicable.
=============================================================================
*/
use std::process::ExitCode;

use position_journal::{config, metrics, EventSourcing, LifecycleStatus, StoreOptions};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    // ---- Load config ----
    let cfg = config::load();

    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter(cfg.log_level.as_str()).init();

    // ---- Metrics ----
    metrics::init();

    // ---- Event log (fail closed: tanpa log yang terbaca, tidak ada audit) ----
    let options = StoreOptions { sync_writes: cfg.sync_writes };
    let es = match EventSourcing::with_options(cfg.event_log_path.clone(), options).await {
        Ok(es) => es,
        Err(e) => {
            error!(%e, path = %cfg.event_log_path.display(), "cannot open event log");
            return ExitCode::FAILURE;
        }
    };

    let stats = es.store.statistics();
    info!(
        events = stats.total_events,
        positions = stats.total_positions,
        symbols = stats.total_symbols,
        oldest = ?stats.oldest_event,
        newest = ?stats.newest_event,
        "event log statistics"
    );

    // ---- Status per posisi ----
    let (mut open, mut closed) = (0usize, 0usize);
    for id in es.store.position_ids() {
        match es.projection.position_status(&id) {
            LifecycleStatus::Open => open += 1,
            LifecycleStatus::Closed => closed += 1,
            LifecycleStatus::Invalid => {}
        }
    }

    // ---- Audit urutan event ----
    let failed = es.projection.audit();
    if failed.is_empty() {
        info!(open, closed, "audit: all event sequences valid");
    } else {
        warn!(open, closed, invalid = failed.len(), "audit: invalid event sequences found");
    }

    if cfg.print_metrics {
        print!("{}", metrics::encode_metrics());
    }

    ExitCode::SUCCESS
}
