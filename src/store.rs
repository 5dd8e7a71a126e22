// ===============================
// src/store.rs
// ===============================
//
// Event log append-only berbasis JSONL:
// - Satu EventRecord per baris, setiap baris bisa di-parse sendiri.
// - Indeks in-memory (urutan datang, per posisi, per simbol) dibangun ulang
//   dengan replay file saat `open`; store yang belum ter-load tidak pernah
//   terlihat oleh pemanggil.
// - Baris rusak di-log lalu dilewati; store tetap bisa start.
// - Kalau file berakhir dengan baris terpotong, append pertama menulis '\n'
//   dulu supaya record baru tidak menempel ke potongan itu.
// - Otomatis membuat parent directory jika belum ada.
// - Jika tulis gagal, handle file dibuang dan dibuka ulang pada append berikutnya.
//
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use ahash::AHashMap as HashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    fs::{self, File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info, warn};

use crate::domain::{EventRecord, PositionEvent, RECORD_VERSION};
use crate::error::{EventLogError, Result};
use crate::metrics::{APPEND_ERRORS, APPEND_LATENCY, CORRUPT_LINES, EVENTS_APPENDED, EVENTS_REPLAYED};

#[derive(Debug, Clone, Copy, Default)]
pub struct StoreOptions {
    /// `sync_data` after every append. Off by default: a record handed to the
    /// OS can still be lost on power failure.
    pub sync_writes: bool,
}

/// Outcome of replaying the durable file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub replayed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatistics {
    pub total_events: usize,
    pub total_positions: usize,
    pub total_symbols: usize,
    pub oldest_event: Option<DateTime<Utc>>,
    pub newest_event: Option<DateTime<Utc>>,
}

/// Append-only arena of records; the keyed indices hold offsets into it.
#[derive(Default)]
struct Indices {
    records: Vec<EventRecord>,
    by_position: HashMap<String, Vec<usize>>,
    by_symbol: HashMap<String, Vec<usize>>,
    // first-seen order of position ids
    positions: Vec<String>,
}

impl Indices {
    fn insert(&mut self, record: EventRecord) {
        let offset = self.records.len();
        match self.by_position.get_mut(&record.event.position_id) {
            Some(list) => list.push(offset),
            None => {
                self.positions.push(record.event.position_id.clone());
                self.by_position.insert(record.event.position_id.clone(), vec![offset]);
            }
        }
        self.by_symbol.entry(record.event.symbol.clone()).or_default().push(offset);
        self.records.push(record);
    }

    fn events_at(&self, offsets: Option<&Vec<usize>>) -> Vec<PositionEvent> {
        offsets
            .map(|list| list.iter().map(|&i| self.records[i].event.clone()).collect())
            .unwrap_or_default()
    }
}

struct Writer {
    file: Option<File>,
    // last byte on disk is not '\n' (torn write before a crash)
    unterminated_tail: bool,
}

pub struct EventStore {
    path: PathBuf,
    options: StoreOptions,
    load_report: LoadReport,
    writer: Mutex<Writer>,
    indices: RwLock<Indices>,
}

async fn open_writer(path: &Path) -> Result<File> {
    // Pastikan parent directory ada (kalau ada)
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.map_err(|e| EventLogError::io(parent, e))?;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| EventLogError::io(path, e))
}

/// Parses every line of the file into `idx`. Also reports whether the file
/// ends mid-line.
async fn replay(path: &Path, idx: &mut Indices) -> Result<(LoadReport, bool)> {
    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "event log: no durable file yet, starting empty");
            return Ok((LoadReport::default(), false));
        }
        Err(e) => return Err(EventLogError::io(path, e)),
    };

    let mut report = LoadReport::default();
    for (line_no, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<EventRecord>(line) {
            Ok(record) => {
                if record.version > RECORD_VERSION {
                    debug!(line = line_no + 1, version = record.version, "event log: newer record version");
                }
                idx.insert(record);
                report.replayed += 1;
            }
            Err(e) => {
                warn!(?e, path = %path.display(), line = line_no + 1, "event log: unparseable line, skipped");
                report.skipped += 1;
            }
        }
    }
    let unterminated_tail = bytes.last().is_some_and(|b| *b != b'\n');

    EVENTS_REPLAYED.inc_by(report.replayed as u64);
    CORRUPT_LINES.inc_by(report.skipped as u64);
    info!(
        path = %path.display(),
        replayed = report.replayed,
        skipped = report.skipped,
        unterminated_tail,
        "event log: loaded"
    );
    Ok((report, unterminated_tail))
}

impl EventStore {
    /// Opens the log at `path` and replays it into memory. A missing file is an
    /// empty log; it is created on the first append.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_options(path, StoreOptions::default()).await
    }

    pub async fn open_with_options(path: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let path = path.into();
        let mut idx = Indices::default();
        let (load_report, unterminated_tail) = replay(&path, &mut idx).await?;
        Ok(Self {
            path,
            options,
            load_report,
            writer: Mutex::new(Writer { file: None, unterminated_tail }),
            indices: RwLock::new(idx),
        })
    }

    pub fn path(&self) -> &Path { &self.path }

    /// What `open` found on disk.
    pub fn load_report(&self) -> LoadReport { self.load_report }

    /// Persists the event as one JSON line, then indexes it. Index order always
    /// matches file order; that arrival order is what projections fold by.
    pub async fn append(&self, event: PositionEvent) -> Result<EventRecord> {
        let started = Instant::now();
        let mut writer = self.writer.lock().await;

        let record = EventRecord::new(event);
        let mut line = String::new();
        if writer.unterminated_tail {
            line.push('\n');
        }
        line.push_str(&serde_json::to_string(&record)?);
        line.push('\n');

        if let Err(e) = self.write_line(&mut writer, line.as_bytes()).await {
            // handle dibuang, append berikutnya akan reopen
            writer.file = None;
            APPEND_ERRORS.inc();
            return Err(e);
        }
        writer.unterminated_tail = false;

        self.write_indices().insert(record.clone());
        drop(writer);

        let kind = record.event.kind();
        EVENTS_APPENDED.with_label_values(&[kind.as_str()]).inc();
        APPEND_LATENCY.observe(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            id = %record.id,
            position_id = %record.event.position_id,
            kind = %kind,
            "event log: appended"
        );
        Ok(record)
    }

    async fn write_line(&self, writer: &mut Writer, bytes: &[u8]) -> Result<()> {
        let file = match writer.file.take() {
            Some(f) => f,
            None => open_writer(&self.path).await?,
        };
        let file = writer.file.insert(file);
        file.write_all(bytes).await.map_err(|e| EventLogError::io(&self.path, e))?;
        file.flush().await.map_err(|e| EventLogError::io(&self.path, e))?;
        if self.options.sync_writes {
            file.sync_data().await.map_err(|e| EventLogError::io(&self.path, e))?;
        }
        Ok(())
    }

    pub fn position_events(&self, position_id: &str) -> Vec<PositionEvent> {
        let idx = self.read_indices();
        idx.events_at(idx.by_position.get(position_id))
    }

    /// Full stored records (id, storage time, version) for one position.
    pub fn position_records(&self, position_id: &str) -> Vec<EventRecord> {
        let idx = self.read_indices();
        idx.by_position
            .get(position_id)
            .map(|list| list.iter().map(|&i| idx.records[i].clone()).collect())
            .unwrap_or_default()
    }

    pub fn symbol_events(&self, symbol: &str) -> Vec<PositionEvent> {
        let idx = self.read_indices();
        idx.events_at(idx.by_symbol.get(symbol))
    }

    pub fn all_events(&self) -> Vec<PositionEvent> {
        self.read_indices().records.iter().map(|r| r.event.clone()).collect()
    }

    /// Events whose logical timestamp lies in `start..=end`, in arrival order.
    pub fn events_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<PositionEvent> {
        self.read_indices()
            .records
            .iter()
            .filter(|r| r.event.timestamp >= start && r.event.timestamp <= end)
            .map(|r| r.event.clone())
            .collect()
    }

    pub fn position_exists(&self, position_id: &str) -> bool {
        self.read_indices().by_position.contains_key(position_id)
    }

    pub fn event_count(&self, position_id: &str) -> usize {
        self.read_indices().by_position.get(position_id).map_or(0, Vec::len)
    }

    pub fn position_ids(&self) -> Vec<String> {
        self.read_indices().positions.clone()
    }

    pub fn statistics(&self) -> StoreStatistics {
        let idx = self.read_indices();
        let timestamps = idx.records.iter().map(|r| r.event.timestamp);
        StoreStatistics {
            total_events: idx.records.len(),
            total_positions: idx.by_position.len(),
            total_symbols: idx.by_symbol.len(),
            oldest_event: timestamps.clone().min(),
            newest_event: timestamps.max(),
        }
    }

    /// Drops every record and deletes the durable file. Testing/admin only.
    pub async fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.file = None;
        writer.unterminated_tail = false;
        *self.write_indices() = Indices::default();
        match fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(EventLogError::io(&self.path, e)),
        }
        warn!(path = %self.path.display(), "event log: cleared");
        Ok(())
    }

    // Lock poisoning only happens if a reader panicked; the arena is never
    // left half-written, so the data is still usable.
    fn read_indices(&self) -> RwLockReadGuard<'_, Indices> {
        self.indices.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_indices(&self) -> RwLockWriteGuard<'_, Indices> {
        self.indices.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventPayload, PositionUpdated};
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(ms).unwrap()
    }

    fn update(pos: &str, symbol: &str, ms: i64) -> PositionEvent {
        PositionEvent::new(pos, symbol, at(ms), EventPayload::PositionUpdated(PositionUpdated::default()))
    }

    #[tokio::test]
    async fn append_indexes_by_position_and_symbol() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.jsonl")).await.unwrap();
        assert_eq!(store.load_report(), LoadReport::default());

        store.append(update("a", "XRPUSD", 1_000)).await.unwrap();
        store.append(update("b", "XRPUSD", 2_000)).await.unwrap();
        store.append(update("a", "BTCUSD", 3_000)).await.unwrap();

        assert_eq!(store.event_count("a"), 2);
        assert_eq!(store.event_count("b"), 1);
        assert_eq!(store.event_count("zzz"), 0);
        assert!(store.position_exists("b"));
        assert!(!store.position_exists("zzz"));
        assert_eq!(store.symbol_events("XRPUSD").len(), 2);
        assert_eq!(store.all_events().len(), 3);
        assert_eq!(store.position_ids(), vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn records_get_unique_increasing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.jsonl")).await.unwrap();

        // same logical timestamp on purpose
        let r1 = store.append(update("a", "S", 5_000)).await.unwrap();
        let r2 = store.append(update("a", "S", 5_000)).await.unwrap();
        assert_ne!(r1.id, r2.id);
        assert!(r1.id < r2.id);
        assert_eq!(r1.version, 1);
    }

    #[tokio::test]
    async fn position_records_keep_storage_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let written = {
            let store = EventStore::open(&path).await.unwrap();
            store.append(update("a", "S", 3_000)).await.unwrap();
            store.append(update("b", "S", 2_000)).await.unwrap();
            store.append(update("a", "S", 1_000)).await.unwrap();
            store.position_records("a")
        };
        assert_eq!(written.len(), 2);

        let store = EventStore::open(&path).await.unwrap();
        let records = store.position_records("a");
        assert_eq!(records, written);
        assert!(records[0].id < records[1].id);
        assert!(records[0].stored_at <= records[1].stored_at);
        assert!(records.iter().all(|r| r.version == RECORD_VERSION));
        // arrival order, not logical timestamp order
        let events: Vec<_> = records.into_iter().map(|r| r.event).collect();
        assert_eq!(events, store.position_events("a"));
        assert_eq!(events[0].timestamp, at(3_000));
        assert!(store.position_records("zzz").is_empty());
    }

    #[tokio::test]
    async fn time_range_is_inclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.jsonl")).await.unwrap();
        for ms in [1_000, 2_000, 3_000, 4_000] {
            store.append(update("a", "S", ms)).await.unwrap();
        }
        let hits = store.events_in_range(at(2_000), at(3_000));
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].timestamp, at(2_000));
        assert_eq!(hits[1].timestamp, at(3_000));
    }

    #[tokio::test]
    async fn statistics_track_counts_and_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let store = EventStore::open(dir.path().join("events.jsonl")).await.unwrap();
        let empty = store.statistics();
        assert_eq!(empty.total_events, 0);
        assert!(empty.oldest_event.is_none());
        assert!(empty.newest_event.is_none());

        store.append(update("a", "XRPUSD", 3_000)).await.unwrap();
        store.append(update("b", "BTCUSD", 1_000)).await.unwrap();
        store.append(update("b", "BTCUSD", 2_000)).await.unwrap();

        let stats = store.statistics();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.total_positions, 2);
        assert_eq!(stats.total_symbols, 2);
        assert_eq!(stats.oldest_event, Some(at(1_000)));
        assert_eq!(stats.newest_event, Some(at(3_000)));
    }

    #[tokio::test]
    async fn reads_see_durable_events_right_after_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let store = EventStore::open(&path).await.unwrap();
            store.append(update("a", "XRPUSD", 1_000)).await.unwrap();
        }

        // no append on the new handle before reading
        let store = EventStore::open(&path).await.unwrap();
        assert_eq!(store.load_report(), LoadReport { replayed: 1, skipped: 0 });
        assert_eq!(store.event_count("a"), 1);
        assert!(store.position_exists("a"));
        assert_eq!(store.symbol_events("XRPUSD").len(), 1);
        assert_eq!(store.statistics().total_events, 1);
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let store = EventStore::open(&path).await.unwrap();
            store.append(update("a", "S", 1_000)).await.unwrap();
            store.append(update("a", "S", 2_000)).await.unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"{\"id\":\"half-writ");
        std::fs::write(&path, bytes).unwrap();

        let reloaded = EventStore::open(&path).await.unwrap();
        assert_eq!(reloaded.load_report(), LoadReport { replayed: 2, skipped: 1 });
        assert_eq!(reloaded.event_count("a"), 2);
    }

    #[tokio::test]
    async fn append_after_torn_tail_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        {
            let store = EventStore::open(&path).await.unwrap();
            store.append(update("a", "S", 1_000)).await.unwrap();
            store.append(update("a", "S", 2_000)).await.unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"{\"id\":\"half-writ");
        std::fs::write(&path, bytes).unwrap();

        {
            let store = EventStore::open(&path).await.unwrap();
            store.append(update("a", "S", 3_000)).await.unwrap();
            store.append(update("a", "S", 4_000)).await.unwrap();
            assert_eq!(store.event_count("a"), 4);
        }

        let reopened = EventStore::open(&path).await.unwrap();
        assert_eq!(reopened.load_report(), LoadReport { replayed: 4, skipped: 1 });
        assert_eq!(reopened.event_count("a"), 4);
        let stamps: Vec<_> = reopened.position_events("a").iter().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![at(1_000), at(2_000), at(3_000), at(4_000)]);

        // only the torn fragment gets its own line, nothing else is padded
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 5);
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn creates_missing_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/events.jsonl");
        let store = EventStore::open_with_options(&path, StoreOptions { sync_writes: true }).await.unwrap();
        store.append(update("a", "S", 1_000)).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn clear_drops_indices_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = EventStore::open(&path).await.unwrap();
        store.append(update("a", "S", 1_000)).await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        assert!(!path.exists());
        assert_eq!(store.statistics().total_events, 0);
        assert!(!store.position_exists("a"));

        // still usable after clear
        store.append(update("b", "S", 2_000)).await.unwrap();
        assert_eq!(store.all_events().len(), 1);
    }

    #[tokio::test]
    async fn unreadable_log_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        // the target path is a directory, so reading it fails
        let err = EventStore::open(dir.path()).await.err().unwrap();
        assert!(matches!(err, EventLogError::Io { .. }));
    }

    #[tokio::test]
    async fn write_failure_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let store = EventStore::open(&path).await.unwrap();
        // a directory now sits where the file would be created
        std::fs::create_dir(&path).unwrap();

        let err = store.append(update("a", "S", 1_000)).await.unwrap_err();
        assert!(matches!(err, EventLogError::Io { .. }));
        assert!(!store.position_exists("a"));
    }
}
