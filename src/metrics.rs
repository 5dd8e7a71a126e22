// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Event log --------
pub static EVENTS_APPENDED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("journal_events_appended_total", "events appended (label: kind)"),
        &["kind"],
    )
    .expect("valid metric definition")
});

pub static APPEND_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("journal_append_errors_total", "appends that failed to persist")
        .expect("valid metric definition")
});

// Latency of one durable append (milliseconds)
pub static APPEND_LATENCY: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("journal_append_latency_ms", "Latency of a durable append (ms)")
            .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 25.0, 100.0]),
    )
    .expect("valid metric definition")
});

pub static EVENTS_REPLAYED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("journal_events_replayed_total", "records replayed from disk on load")
        .expect("valid metric definition")
});

pub static CORRUPT_LINES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("journal_corrupt_lines_total", "unparseable lines skipped on load")
        .expect("valid metric definition")
});

// -------- Projection --------
pub static SEQUENCE_VIOLATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "journal_sequence_violations_total",
            "sequence invariant violations found by validation (label: rule)",
        ),
        &["rule"],
    )
    .expect("valid metric definition")
});

pub fn init() {
    // Register all metrics to the custom registry. A second call only yields
    // AlreadyReg errors, which are ignored.
    for m in [
        REGISTRY.register(Box::new(EVENTS_APPENDED.clone())),
        REGISTRY.register(Box::new(APPEND_ERRORS.clone())),
        REGISTRY.register(Box::new(APPEND_LATENCY.clone())),
        REGISTRY.register(Box::new(EVENTS_REPLAYED.clone())),
        REGISTRY.register(Box::new(CORRUPT_LINES.clone())),
        REGISTRY.register(Box::new(SEQUENCE_VIOLATIONS.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        return "# no metrics\n".to_string();
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_repeatable_and_encodes() {
        init();
        init();
        EVENTS_APPENDED.with_label_values(&["POSITION_OPENED"]).inc();
        let text = encode_metrics();
        assert!(text.contains("journal_events_appended_total"));
    }
}
