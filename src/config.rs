// ===============================
// src/config.rs
// ===============================
/*
=============================================================================
Project : position_journal — append-only position event log in Rust
Module  : config.rs
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
use std::env;
use std::path::PathBuf;

use dotenvy::dotenv;

pub const DEFAULT_EVENT_LOG_PATH: &str = "data/events/position-events.jsonl";

#[derive(Clone, Debug)]
pub struct Config {
    // storage
    pub event_log_path: PathBuf,
    pub sync_writes: bool, // fsync tiap append

    // logging / metrics
    pub log_level: String,
    pub print_metrics: bool,
}

/// "1", "true", "yes", "on" (case-insensitive) -> true; unset/unknown -> default.
fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key).unwrap_or_default().trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

pub fn load() -> Config {
    // Pastikan .env dibaca (agar EVENT_LOG_PATH, dll ter-load)
    let _ = dotenv();

    let event_log_path = env::var("EVENT_LOG_PATH")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_EVENT_LOG_PATH));

    let sync_writes = env_flag("EVENT_LOG_FSYNC", false);
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let print_metrics = env_flag("PRINT_METRICS", false);

    Config { event_log_path, sync_writes, log_level, print_metrics }
}
