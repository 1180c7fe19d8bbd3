//! Durable storage for the knowledge store.
//!
//! Writes never happen on the caller's path. Callers only mark the store as
//! dirty; a background [`Persister`] task coalesces those requests, writes
//! the newest table with a timeout and retries failures with capped
//! exponential backoff. The in-memory table stays authoritative throughout.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{PolicyError, Result};
use crate::store::KnowledgeStore;

/// Key/value storage the knowledge snapshot is written to.
#[async_trait]
pub trait KvBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
}

/// Process-local backend. Entries with a TTL disappear once it has elapsed.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut entries = self.entries.lock();
        let expired = matches!(entries.get(key), Some((_, Some(deadline))) if *deadline <= Instant::now());
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|(bytes, _)| bytes.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let deadline = ttl.map(|t| Instant::now() + t);
        self.entries.lock().insert(key.to_string(), (value, deadline));
        Ok(())
    }
}

/// One JSON file per key below `root`. Files are replaced atomically via a
/// temporary file and a rename. TTLs are not enforced on disk.
#[derive(Debug, Clone)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{file}.json"))
    }
}

#[async_trait]
impl KvBackend for FileBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        if ttl.is_some() {
            debug!(key, "file backend ignores ttl");
        }
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &value).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

/// Settings for loading and flushing the knowledge snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Backend key the snapshot is stored under.
    pub key: String,
    /// Upper bound for a single backend call.
    pub timeout_ms: u64,
    /// Upper bound for [`Persister::flush`] to wait on the background writer.
    pub flush_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub ttl_secs: Option<u64>,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            key: "wartlern.knowledge".to_string(),
            timeout_ms: 2_000,
            flush_timeout_ms: 5_000,
            initial_backoff_ms: 200,
            max_backoff_ms: 10_000,
            ttl_secs: None,
        }
    }
}

impl PersistConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.max(1))
    }

    #[must_use]
    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms.max(1))
    }

    #[must_use]
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms.max(1))
    }

    fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms).max(1))
    }
}

/// Counters describing the background writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PersistStats {
    pub flushes: u64,
    pub failures: u64,
    pub requested_generation: u64,
    pub persisted_generation: u64,
}

#[derive(Debug, Default)]
struct FlushCounters {
    flushes: AtomicU64,
    failures: AtomicU64,
}

/// Background writer for a [`KnowledgeStore`].
#[derive(Debug)]
pub struct Persister {
    store: Arc<KnowledgeStore>,
    requested: watch::Sender<u64>,
    persisted: watch::Receiver<u64>,
    counters: Arc<FlushCounters>,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    flush_timeout: Duration,
}

impl Persister {
    /// Starts the writer task. Must be called from within a Tokio runtime.
    ///
    /// The store's current generation is assumed to be what the backend
    /// already holds, i.e. the store was just loaded from it.
    pub fn spawn(store: Arc<KnowledgeStore>, backend: Arc<dyn KvBackend>, config: PersistConfig) -> Self {
        let generation = store.generation();
        let (requested_tx, requested_rx) = watch::channel(generation);
        let (persisted_tx, persisted_rx) = watch::channel(generation);
        let counters = Arc::new(FlushCounters::default());
        let shutdown = CancellationToken::new();
        let flush_timeout = config.flush_timeout();

        let worker = tokio::spawn(run_writer(
            Arc::clone(&store),
            backend,
            config,
            requested_rx,
            persisted_tx,
            Arc::clone(&counters),
            shutdown.clone(),
        ));

        Self {
            store,
            requested: requested_tx,
            persisted: persisted_rx,
            counters,
            shutdown,
            worker: Mutex::new(Some(worker)),
            flush_timeout,
        }
    }

    /// Marks the store dirty. Never blocks and never fails.
    pub fn request_flush(&self) {
        self.requested.send_replace(self.store.generation());
    }

    /// Waits until everything written so far is persisted, bounded by the
    /// configured flush timeout.
    pub async fn flush(&self) -> Result<()> {
        let target = self.store.generation();
        if *self.persisted.borrow() >= target {
            return Ok(());
        }
        self.request_flush();

        let mut persisted = self.persisted.clone();
        let reached = tokio::time::timeout(
            self.flush_timeout,
            persisted.wait_for(|generation| *generation >= target),
        )
        .await
        .map(|r| r.is_ok());

        match reached {
            Ok(true) => Ok(()),
            Ok(false) => Err(PolicyError::PersistenceUnavailable(
                "knowledge writer stopped".to_string(),
            )),
            Err(_) => Err(PolicyError::PersistenceUnavailable(format!(
                "generation {target} not persisted within {:?}",
                self.flush_timeout
            ))),
        }
    }

    /// Flushes, then stops the writer. The flush result is returned even
    /// when it failed; the writer is stopped either way.
    pub async fn shutdown(&self) -> Result<()> {
        let flushed = self.flush().await;
        self.shutdown.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "knowledge writer ended abnormally");
            }
        }
        flushed
    }

    #[must_use]
    pub fn stats(&self) -> PersistStats {
        PersistStats {
            flushes: self.counters.flushes.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
            requested_generation: *self.requested.borrow(),
            persisted_generation: *self.persisted.borrow(),
        }
    }
}

impl Drop for Persister {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_writer(
    store: Arc<KnowledgeStore>,
    backend: Arc<dyn KvBackend>,
    config: PersistConfig,
    mut requested: watch::Receiver<u64>,
    persisted: watch::Sender<u64>,
    counters: Arc<FlushCounters>,
    shutdown: CancellationToken,
) {
    debug!(key = %config.key, "knowledge writer started");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            changed = requested.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let mut backoff = config.initial_backoff();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match write_once(&store, backend.as_ref(), &config).await {
                Ok(generation) => {
                    counters.flushes.fetch_add(1, Ordering::Relaxed);
                    persisted.send_replace(generation);
                    if attempt > 1 {
                        info!(generation, attempt, "knowledge flush recovered");
                    } else {
                        debug!(generation, "knowledge flushed");
                    }
                    break;
                }
                Err(e) => {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        error = %e,
                        attempt,
                        retry_in_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "knowledge flush failed"
                    );
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        () = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(config.max_backoff());
                }
            }
        }
    }
    debug!(key = %config.key, "knowledge writer stopped");
}

async fn write_once(store: &KnowledgeStore, backend: &dyn KvBackend, config: &PersistConfig) -> Result<u64> {
    let timeout = config.timeout();
    tokio::time::timeout(timeout, store.save(backend, &config.key, config.ttl()))
        .await
        .map_err(|_| PolicyError::PersistenceUnavailable(format!("write timed out after {timeout:?}")))?
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
#[allow(clippy::expect_used)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use wartlern_core::{ActionId, StateKey};

    /// Fails every write while `down` is set.
    #[derive(Debug, Default)]
    struct FlakyBackend {
        inner: MemoryBackend,
        down: AtomicBool,
    }

    #[async_trait]
    impl KvBackend for FlakyBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(PolicyError::PersistenceUnavailable("backend down".into()));
            }
            self.inner.set(key, value, ttl).await
        }
    }

    /// Never answers a write.
    #[derive(Debug, Default)]
    struct StalledBackend;

    #[async_trait]
    impl KvBackend for StalledBackend {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Option<Duration>) -> Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn fast_config() -> PersistConfig {
        PersistConfig {
            timeout_ms: 50,
            flush_timeout_ms: 2_000,
            initial_backoff_ms: 5,
            max_backoff_ms: 20,
            ..PersistConfig::default()
        }
    }

    #[tokio::test]
    async fn memory_backend_honours_ttl() {
        let backend = MemoryBackend::new();
        backend
            .set("k", b"v".to_vec(), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap(), Some(b"v".to_vec()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_backend_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = FileBackend::new(dir.path().join("nested"));
        assert_eq!(backend.get("wartlern/knowledge").await.unwrap(), None);
        backend
            .set("wartlern/knowledge", b"{}".to_vec(), None)
            .await
            .unwrap();
        assert_eq!(
            backend.get("wartlern/knowledge").await.unwrap(),
            Some(b"{}".to_vec())
        );
        assert!(dir.path().join("nested/wartlern_knowledge.json").exists());
    }

    #[tokio::test]
    async fn flush_persists_latest_table() {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(KnowledgeStore::new());
        let persister = Persister::spawn(Arc::clone(&store), backend.clone(), fast_config());

        store.set(&StateKey::from_raw("s"), &ActionId::from_raw("a"), 1.5);
        persister.request_flush();
        persister.flush().await.expect("flush");

        let reloaded = KnowledgeStore::load(backend.as_ref(), "wartlern.knowledge", Duration::from_secs(1))
            .await
            .expect("load");
        assert_eq!(reloaded.get(&StateKey::from_raw("s"), &ActionId::from_raw("a")), 1.5);
        assert!(persister.stats().flushes >= 1);
        persister.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn failed_writes_are_retried_until_backend_recovers() {
        let backend = Arc::new(FlakyBackend::default());
        backend.down.store(true, Ordering::SeqCst);
        let store = Arc::new(KnowledgeStore::new());
        let persister = Persister::spawn(Arc::clone(&store), backend.clone(), fast_config());

        store.set(&StateKey::from_raw("s"), &ActionId::from_raw("a"), 3.0);
        persister.request_flush();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(persister.stats().failures >= 1);
        // Memory stays authoritative while the backend is down.
        assert_eq!(store.get(&StateKey::from_raw("s"), &ActionId::from_raw("a")), 3.0);

        backend.down.store(false, Ordering::SeqCst);
        persister.flush().await.expect("flush after recovery");
        assert!(backend.inner.get("wartlern.knowledge").await.unwrap().is_some());
        persister.shutdown().await.expect("shutdown");
    }

    #[tokio::test]
    async fn stalled_backend_times_out_without_blocking_callers() {
        let store = Arc::new(KnowledgeStore::new());
        let config = PersistConfig {
            flush_timeout_ms: 100,
            ..fast_config()
        };
        let persister = Persister::spawn(Arc::clone(&store), Arc::new(StalledBackend), config);

        let started = Instant::now();
        store.set(&StateKey::from_raw("s"), &ActionId::from_raw("a"), 1.0);
        persister.request_flush();
        assert!(started.elapsed() < Duration::from_millis(50));

        let err = persister.flush().await.expect_err("stalled backend cannot flush");
        assert!(matches!(err, PolicyError::PersistenceUnavailable(_)));
        assert!(persister.shutdown().await.is_err());
    }

    #[tokio::test]
    async fn flush_without_changes_returns_immediately() {
        let store = Arc::new(KnowledgeStore::new());
        let persister = Persister::spawn(store, Arc::new(StalledBackend), fast_config());
        persister.flush().await.expect("nothing to flush");
        persister.shutdown().await.expect("shutdown");
    }
}
