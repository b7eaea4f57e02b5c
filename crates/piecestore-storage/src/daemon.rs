//! Background capacity enforcement
//!
//! One thread per store wakes every `check_interval`, compares the stored
//! content size against the threshold and runs an eviction pass when it is
//! exceeded. Passes never overlap: the thread runs them one at a time, and
//! each pass is a single write transaction bounded by the reclaim target.
//! A failed pass is logged and counted; the next tick tries again.

use crate::error::StoreResult;
use crate::store::StoreInner;
use crossbeam_channel::{RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters of the capacity daemon
#[derive(Debug, Default)]
pub struct DaemonStats {
    /// Capacity checks run
    pub passes: AtomicU64,
    /// Checks that found the threshold exceeded and evicted
    pub evictions: AtomicU64,
    /// Checks that failed (logged, retried on the next tick)
    pub failed_passes: AtomicU64,
    /// Chunks deleted by the daemon
    pub evicted_chunks: AtomicU64,
    /// Nominal bytes reclaimed by the daemon
    pub reclaimed_bytes: AtomicU64,
}

/// Handle to the background capacity thread.
///
/// Dropping the handle stops the thread and waits for the current pass.
pub struct CapacityDaemon {
    stop_tx: Option<Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
    stats: Arc<DaemonStats>,
}

impl CapacityDaemon {
    pub(crate) fn spawn(inner: Arc<StoreInner>) -> StoreResult<Self> {
        let interval = inner.capacity_interval();
        let stats = Arc::new(DaemonStats::default());
        let (stop_tx, stop_rx) = bounded::<()>(1);

        let thread_stats = Arc::clone(&stats);
        let handle = thread::Builder::new()
            .name("piecestore-capacity".to_string())
            .spawn(move || {
                info!("Capacity daemon started (interval {:?})", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => run_pass(&inner, &thread_stats),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Capacity daemon stopped");
            })?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            stats,
        })
    }

    /// Get statistics
    #[must_use]
    pub fn stats(&self) -> &DaemonStats {
        &self.stats
    }

    /// Signal the thread to stop and wait for it. Idempotent.
    pub fn stop(&mut self) {
        // Dropping the sender disconnects the channel
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Capacity daemon thread panicked");
            }
        }
    }
}

impl Drop for CapacityDaemon {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_pass(inner: &StoreInner, stats: &DaemonStats) {
    stats.passes.fetch_add(1, Ordering::Relaxed);
    match inner.enforce_capacity() {
        Ok(Some(report)) => {
            stats.evictions.fetch_add(1, Ordering::Relaxed);
            stats
                .evicted_chunks
                .fetch_add(report.evicted_chunks, Ordering::Relaxed);
            stats
                .reclaimed_bytes
                .fetch_add(report.reclaimed_bytes, Ordering::Relaxed);
        }
        Ok(None) => debug!("Capacity check passed"),
        Err(e) => {
            stats.failed_passes.fetch_add(1, Ordering::Relaxed);
            warn!("Capacity pass failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PieceStore;
    use piecestore_common::{CHUNK_SIZE, INFO_HASH_LEN, InfoHash, PieceInfo, StoreConfig};
    use std::time::Instant;
    use tempfile::tempdir;

    const POLL: Duration = Duration::from_millis(50);

    fn daemon_config(threshold: u64) -> StoreConfig {
        let mut config = StoreConfig::with_threshold(threshold);
        config.capacity.check_interval_secs = 1;
        config
    }

    fn wait_for(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if done() {
                return true;
            }
            thread::sleep(POLL);
        }
        done()
    }

    #[test]
    fn test_daemon_evicts_when_over_threshold() {
        let dir = tempdir().unwrap();
        let store = PieceStore::open(dir.path(), daemon_config(4 * CHUNK_SIZE as u64)).unwrap();
        let object = store.open_object(InfoHash::new([7; INFO_HASH_LEN]));

        let pieces: Vec<_> = (0..10)
            .map(|i| object.piece(PieceInfo::new(i, CHUNK_SIZE as u64).unwrap()))
            .collect();
        for piece in &pieces {
            piece.write_at(0, &[1u8; CHUNK_SIZE]).unwrap();
        }

        let stats = store.daemon_stats().unwrap();
        assert!(wait_for(Duration::from_secs(10), || {
            stats.evictions.load(Ordering::Relaxed) >= 1
        }));
        assert!(stats.evicted_chunks.load(Ordering::Relaxed) >= 1);
        assert_eq!(stats.failed_passes.load(Ordering::Relaxed), 0);

        // Oldest first
        assert_eq!(pieces[0].read_at(0, 1).unwrap(), None);
        assert!(pieces[9].read_at(0, 1).unwrap().is_some());

        store.close().unwrap();
    }

    #[test]
    fn test_daemon_settles_within_threshold() {
        let dir = tempdir().unwrap();
        let threshold = 8 * CHUNK_SIZE as u64;
        let store = PieceStore::open(dir.path(), daemon_config(threshold)).unwrap();
        let object = store.open_object(InfoHash::new([9; INFO_HASH_LEN]));

        for i in 0..16 {
            object
                .piece(PieceInfo::new(i, CHUNK_SIZE as u64).unwrap())
                .write_at(0, &[2u8; CHUNK_SIZE])
                .unwrap();
        }
        assert!(store.stats().unwrap().content_bytes > threshold);

        // Run until a full interval passes without another eviction
        let stats = store.daemon_stats().unwrap();
        let mut last_evictions = u64::MAX;
        assert!(wait_for(Duration::from_secs(30), || {
            let evictions = stats.evictions.load(Ordering::Relaxed);
            let settled = evictions == last_evictions
                && store.stats().unwrap().content_bytes <= threshold;
            last_evictions = evictions;
            if !settled {
                thread::sleep(Duration::from_millis(1500));
            }
            settled
        }));

        let content_bytes = store.stats().unwrap().content_bytes;
        assert!(content_bytes <= threshold);
        assert!(content_bytes >= threshold - threshold / 4 - CHUNK_SIZE as u64);
        assert!(stats.evictions.load(Ordering::Relaxed) >= 1);
        assert_eq!(stats.failed_passes.load(Ordering::Relaxed), 0);

        store.close().unwrap();
    }

    #[test]
    fn test_daemon_idle_within_threshold() {
        let dir = tempdir().unwrap();
        let store = PieceStore::open(dir.path(), daemon_config(1 << 30)).unwrap();
        let piece = store
            .open_object(InfoHash::new([8; INFO_HASH_LEN]))
            .piece(PieceInfo::new(0, CHUNK_SIZE as u64).unwrap());
        piece.write_at(0, b"small").unwrap();

        let stats = store.daemon_stats().unwrap();
        assert!(wait_for(Duration::from_secs(5), || {
            stats.passes.load(Ordering::Relaxed) >= 1
        }));
        assert_eq!(stats.evictions.load(Ordering::Relaxed), 0);
        assert_eq!(piece.read_at(0, 5).unwrap(), Some(b"small".to_vec()));
    }

    #[test]
    fn test_drop_stops_daemon_promptly() {
        let dir = tempdir().unwrap();
        let mut config = daemon_config(1 << 30);
        config.capacity.check_interval_secs = 3600;
        let store = PieceStore::open(dir.path(), config).unwrap();

        // Stop must not wait out the hour-long interval
        let start = Instant::now();
        drop(store);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_disabled_daemon_has_no_stats() {
        let dir = tempdir().unwrap();
        let mut config = StoreConfig::default();
        config.capacity.enabled = false;
        let store = PieceStore::open(dir.path(), config).unwrap();
        assert!(store.daemon_stats().is_none());
    }
}
