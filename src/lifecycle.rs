// ===============================
// src/lifecycle.rs
// ===============================
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::DEFAULT_EVENT_LOG_PATH;
use crate::emitter::EventEmitter;
use crate::error::Result;
use crate::projection::StateProjection;
use crate::store::{EventStore, StoreOptions};

/// Store, emitter and projection sharing one log. Build it once at startup and
/// hand it (or its parts) to whoever needs it.
#[derive(Clone)]
pub struct EventSourcing {
    pub store: Arc<EventStore>,
    pub emitter: EventEmitter,
    pub projection: StateProjection,
}

impl EventSourcing {
    pub async fn initialize(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_options(path, StoreOptions::default()).await
    }

    /// Loads the durable file before anything can read or write.
    pub async fn with_options(path: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let store = Arc::new(EventStore::open_with_options(path, options).await?);
        let report = store.load_report();
        info!(
            path = %store.path().display(),
            replayed = report.replayed,
            skipped = report.skipped,
            sync_writes = options.sync_writes,
            "event sourcing: ready"
        );
        Ok(Self {
            projection: StateProjection::new(store.clone()),
            emitter: EventEmitter::new(store.clone()),
            store,
        })
    }
}

// Process-wide instance for test harnesses and small embeddings.
static SHARED: Lazy<Mutex<Option<Arc<EventSourcing>>>> = Lazy::new(|| Mutex::new(None));

/// Returns the shared instance, creating it on first call. `path` is only used
/// on creation; it defaults to `DEFAULT_EVENT_LOG_PATH`.
pub async fn shared_instance(path: Option<&Path>) -> Result<Arc<EventSourcing>> {
    let mut slot = SHARED.lock().await;
    if let Some(existing) = slot.as_ref() {
        return Ok(existing.clone());
    }
    let path = path.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from(DEFAULT_EVENT_LOG_PATH));
    let instance = Arc::new(EventSourcing::initialize(path).await?);
    *slot = Some(instance.clone());
    Ok(instance)
}

/// Forgets the shared instance. The next `shared_instance` call reloads from disk.
pub async fn reset_shared_instance() {
    SHARED.lock().await.take();
}
