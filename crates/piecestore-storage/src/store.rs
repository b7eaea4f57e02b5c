//! Piece store backed by redb.
//!
//! One database file per store holds two tables: chunk content and the
//! sequence index. Every operation is one transaction; failures are returned
//! to the caller and never retried here.

use crate::daemon::{CapacityDaemon, DaemonStats};
use crate::error::{StoreError, StoreResult};
use crate::eviction::{self, EvictionReport, keys_with_prefix};
use crate::keys::ContentKey;
use crate::sequence::SequenceGenerator;
use crate::tables::{CONTENT, SEQUENCE};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};
use piecestore_common::{
    CHUNK_SIZE, Error, InfoHash, PieceInfo, SequenceKey, StoreConfig, SyncMode,
};
use redb::{Database, Durability, ReadableTable, ReadableTableMetadata, WriteTransaction};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// State shared by the store, its handles and the capacity daemon
pub(crate) struct StoreInner {
    /// `None` once the store is closed
    db: RwLock<Option<Database>>,
    sequence: SequenceGenerator,
    config: StoreConfig,
    path: PathBuf,
}

impl StoreInner {
    /// Shared access to the open database. Callers hold the guard for the
    /// whole operation, so closing waits for operations in flight.
    fn db(&self) -> StoreResult<MappedRwLockReadGuard<'_, Database>> {
        RwLockReadGuard::try_map(self.db.read(), Option::as_ref).map_err(|_| StoreError::Closed)
    }

    fn begin_write(&self, db: &Database) -> StoreResult<WriteTransaction> {
        let mut write_txn = db.begin_write()?;
        write_txn.set_durability(match self.config.sync_mode {
            SyncMode::Relaxed => Durability::None,
            SyncMode::Full => Durability::Immediate,
        });
        Ok(write_txn)
    }

    pub(crate) const fn capacity_interval(&self) -> Duration {
        self.config.capacity.check_interval()
    }

    pub(crate) fn enforce_capacity(&self) -> StoreResult<Option<EvictionReport>> {
        let db = self.db()?;
        eviction::enforce_capacity(&db, &self.config.capacity)
    }
}

/// Persistent piece store.
///
/// Owns the database, the sequence generator and (when enabled) the
/// capacity daemon. Handles returned by [`PieceStore::open_object`] share the
/// same database and stay cheap to create.
pub struct PieceStore {
    inner: Arc<StoreInner>,
    daemon: Option<CapacityDaemon>,
}

/// Point-in-time store statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of stored chunks
    pub content_entries: u64,
    /// Bytes of keys and values in the content table
    pub content_bytes: u64,
    /// Number of sequence records (pieces with live content)
    pub sequence_records: u64,
}

/// One entry of the sequence index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceRecord {
    /// When the piece was first written, in write order
    pub key: SequenceKey,
    /// Piece the record points at
    pub piece: ContentKey,
}

impl PieceStore {
    /// Open (or create) the store in `dir`.
    ///
    /// Creates both tables, seeds the sequence generator past the newest
    /// persisted record and starts the capacity daemon if enabled. A store
    /// that failed to open must not be used.
    pub fn open(dir: impl AsRef<Path>, config: StoreConfig) -> StoreResult<Self> {
        config.validate()?;
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(&config.file_name);
        let db = Database::create(&path)?;

        // Create both tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(CONTENT)?;
            let _t = write_txn.open_table(SEQUENCE)?;
        }
        write_txn.commit()?;

        let last = {
            let read_txn = db.begin_read()?;
            let table = read_txn.open_table(SEQUENCE)?;
            table
                .last()?
                .map_or(SequenceKey::new(0), |(k, _)| SequenceKey::from_bytes(*k.value()))
        };

        let inner = Arc::new(StoreInner {
            db: RwLock::new(Some(db)),
            sequence: SequenceGenerator::starting_after(last),
            config,
            path,
        });

        let daemon = if inner.config.capacity.enabled {
            Some(CapacityDaemon::spawn(Arc::clone(&inner))?)
        } else {
            None
        };

        info!(
            "Opened piece store at {:?} (last sequence key {}, capacity daemon {})",
            inner.path,
            last,
            if daemon.is_some() { "running" } else { "disabled" }
        );
        Ok(Self { inner, daemon })
    }

    /// Handle for an object. No I/O.
    #[must_use]
    pub fn open_object(&self, info_hash: InfoHash) -> ObjectHandle {
        ObjectHandle {
            inner: Arc::clone(&self.inner),
            info_hash,
        }
    }

    /// Path of the database file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Configuration the store was opened with
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Counters of the capacity daemon, if it is running
    #[must_use]
    pub fn daemon_stats(&self) -> Option<&DaemonStats> {
        self.daemon.as_ref().map(CapacityDaemon::stats)
    }

    /// Get statistics
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let db = self.inner.db()?;
        let read_txn = db.begin_read()?;
        let content = read_txn.open_table(CONTENT)?;
        let sequence = read_txn.open_table(SEQUENCE)?;
        Ok(StoreStats {
            content_entries: content.len()?,
            content_bytes: content.stats()?.stored_bytes(),
            sequence_records: sequence.len()?,
        })
    }

    /// Sequence records in eviction order (oldest first)
    pub fn sequence_records(&self) -> StoreResult<Vec<SequenceRecord>> {
        let db = self.inner.db()?;
        let read_txn = db.begin_read()?;
        let table = read_txn.open_table(SEQUENCE)?;
        let mut records = Vec::new();
        for entry in table.iter()? {
            let (key, value) = entry?;
            records.push(SequenceRecord {
                key: SequenceKey::from_bytes(*key.value()),
                piece: ContentKey::from_slice(value.value())?,
            });
        }
        Ok(records)
    }

    /// Run one capacity check now, evicting if the threshold is exceeded.
    pub fn enforce_capacity(&self) -> StoreResult<Option<EvictionReport>> {
        self.inner.enforce_capacity()
    }

    /// Evict `target_bytes` (nominal) of the oldest content now, regardless
    /// of the threshold.
    pub fn evict(&self, target_bytes: u64) -> StoreResult<EvictionReport> {
        let report = eviction::evict(&*self.inner.db()?, target_bytes)?;
        info!(
            "Manual eviction removed {} chunks ({} pieces)",
            report.evicted_chunks, report.sequence_records_removed
        );
        Ok(report)
    }

    /// Stop the daemon, flush relaxed commits to disk and close the database
    /// file, so the directory can be opened again.
    ///
    /// Waits for operations in flight. Handles still alive afterwards fail
    /// with [`StoreError::Closed`].
    pub fn close(mut self) -> StoreResult<()> {
        self.shutdown()?;
        info!("Closed piece store at {:?}", self.inner.path);
        Ok(())
    }

    fn shutdown(&mut self) -> StoreResult<()> {
        if let Some(mut daemon) = self.daemon.take() {
            daemon.stop();
        }
        let Some(db) = self.inner.db.write().take() else {
            return Ok(());
        };

        // A durable commit makes every earlier non-durable commit persistent
        let mut write_txn = db.begin_write()?;
        write_txn.set_durability(Durability::Immediate);
        write_txn.commit()?;
        drop(db);
        Ok(())
    }
}

impl Drop for PieceStore {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to flush piece store at {:?}: {}", self.inner.path, e);
        }
    }
}

/// Handle for one object (all pieces sharing an info hash)
#[derive(Clone)]
pub struct ObjectHandle {
    inner: Arc<StoreInner>,
    info_hash: InfoHash,
}

impl ObjectHandle {
    /// Object identifier
    #[must_use]
    pub const fn info_hash(&self) -> &InfoHash {
        &self.info_hash
    }

    /// Handle for one piece. No I/O.
    #[must_use]
    pub fn piece(&self, info: PieceInfo) -> PieceHandle {
        PieceHandle {
            inner: Arc::clone(&self.inner),
            key: ContentKey::new(&self.info_hash, info.index),
            info,
        }
    }

    /// Delete every chunk of the object and the sequence records of its
    /// pieces in one transaction. Returns the number of chunks deleted.
    pub fn remove(&self) -> StoreResult<u64> {
        let prefix = self.info_hash.as_bytes().as_slice();
        let db = self.inner.db()?;
        let write_txn = self.inner.begin_write(&db)?;
        let removed = {
            let mut content = write_txn.open_table(CONTENT)?;
            let keys = keys_with_prefix(&content, prefix, usize::MAX)?;
            for key in &keys {
                content.remove(key.as_slice())?;
            }

            let mut sequence = write_txn.open_table(SEQUENCE)?;
            let mut records = Vec::new();
            for entry in sequence.iter()? {
                let (key, value) = entry?;
                if value.value().starts_with(prefix) {
                    records.push(*key.value());
                }
            }
            for key in &records {
                sequence.remove(key)?;
            }
            keys.len() as u64
        };
        write_txn.commit()?;

        info!("Removed object {} ({} chunks)", self.info_hash, removed);
        Ok(removed)
    }
}

/// Handle for one piece of an object
#[derive(Clone)]
pub struct PieceHandle {
    inner: Arc<StoreInner>,
    key: ContentKey,
    info: PieceInfo,
}

impl PieceHandle {
    /// Piece descriptor
    #[must_use]
    pub const fn info(&self) -> &PieceInfo {
        &self.info
    }

    /// Content key prefix of this piece
    #[must_use]
    pub const fn key(&self) -> &ContentKey {
        &self.key
    }

    /// Write `data` at `offset` within the piece in one transaction.
    ///
    /// Chunks only partly covered by the write are read and patched. The
    /// first write that gives the piece any content also inserts its sequence
    /// record; later writes leave the record as it is.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> StoreResult<()> {
        self.check_range(offset, data.len())?;
        if data.is_empty() {
            return Ok(());
        }

        let db = self.inner.db()?;
        let write_txn = self.inner.begin_write(&db)?;
        let sequence_key = {
            let mut content = write_txn.open_table(CONTENT)?;
            let first_write = keys_with_prefix(&content, self.key.as_bytes(), 1)?.is_empty();

            let mut remaining = data;
            let mut pos = offset;
            while !remaining.is_empty() {
                let (chunk_index, within) = chunk_position(pos)?;
                let take = remaining.len().min(CHUNK_SIZE - within);
                let key = self.key.chunk(chunk_index);

                let mut buf = if within == 0 && take == CHUNK_SIZE {
                    Vec::with_capacity(CHUNK_SIZE)
                } else {
                    content
                        .get(key.as_bytes())?
                        .map(|v| v.value().to_vec())
                        .unwrap_or_default()
                };
                if buf.len() < within + take {
                    buf.resize(within + take, 0);
                }
                buf[within..within + take].copy_from_slice(&remaining[..take]);
                content.insert(key.as_bytes(), buf.as_slice())?;

                remaining = &remaining[take..];
                pos += take as u64;
            }

            if first_write {
                let sequence_key = self.inner.sequence.next()?;
                let mut sequence = write_txn.open_table(SEQUENCE)?;
                sequence.insert(&sequence_key.to_bytes(), self.key.as_bytes())?;
                Some(sequence_key)
            } else {
                None
            }
        };
        write_txn.commit()?;

        debug!(
            "write: object={} piece={} offset={} len={} sequence={:?}",
            self.key.info_hash(),
            self.info.index,
            offset,
            data.len(),
            sequence_key
        );
        Ok(())
    }

    /// Read up to `len` bytes at `offset` in one read transaction.
    ///
    /// Returns the contiguous stored bytes from `offset`, stopping at the
    /// first missing or short chunk, or `None` if nothing there is stored
    /// (never written, or evicted). A zero-length read is `Some(vec![])` when
    /// the piece has any stored content and `None` otherwise.
    pub fn read_at(&self, offset: u64, len: usize) -> StoreResult<Option<Vec<u8>>> {
        self.check_range(offset, len)?;
        let db = self.inner.db()?;
        let read_txn = db.begin_read()?;
        let content = read_txn.open_table(CONTENT)?;
        if len == 0 {
            let stored = !keys_with_prefix(&content, self.key.as_bytes(), 1)?.is_empty();
            return Ok(stored.then(Vec::new));
        }

        let end = offset + len as u64;
        let mut out = Vec::with_capacity(len);
        let mut pos = offset;
        while pos < end {
            let (chunk_index, within) = chunk_position(pos)?;
            let want = usize::try_from(end - pos)
                .unwrap_or(usize::MAX)
                .min(CHUNK_SIZE - within);

            let Some(value) = content.get(self.key.chunk(chunk_index).as_bytes())? else {
                break;
            };
            let stored = value.value();
            if stored.len() <= within {
                break;
            }
            let available = (stored.len() - within).min(want);
            out.extend_from_slice(&stored[within..within + available]);
            pos += available as u64;
            if available < want {
                break;
            }
        }

        if out.is_empty() {
            Ok(None)
        } else {
            Ok(Some(out))
        }
    }

    /// Whether every chunk of the piece is stored at full length
    pub fn is_complete(&self) -> StoreResult<bool> {
        let db = self.inner.db()?;
        let read_txn = db.begin_read()?;
        let content = read_txn.open_table(CONTENT)?;
        for chunk in 0..self.info.chunk_count() {
            let chunk_index = u16::try_from(chunk)
                .map_err(|_| Error::invalid_argument(format!("chunk index {chunk} out of range")))?;
            let stored = content
                .get(self.key.chunk(chunk_index).as_bytes())?
                .map_or(0, |v| v.value().len());
            if stored < self.info.chunk_length(chunk) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_range(&self, offset: u64, len: usize) -> StoreResult<()> {
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.info.length);
        if !in_bounds {
            return Err(Error::OutOfBounds {
                offset,
                len,
                piece_length: self.info.length,
            }
            .into());
        }
        Ok(())
    }
}

/// Chunk index and offset within that chunk for a piece offset
fn chunk_position(pos: u64) -> StoreResult<(u16, usize)> {
    let chunk_index = u16::try_from(pos / CHUNK_SIZE as u64)
        .map_err(|_| Error::invalid_argument(format!("offset {pos} beyond addressable chunks")))?;
    // Remainder of a division by CHUNK_SIZE always fits
    let within = (pos % CHUNK_SIZE as u64) as usize;
    Ok((chunk_index, within))
}

impl std::fmt::Debug for PieceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PieceStore")
            .field("path", &self.inner.path)
            .field("daemon", &self.daemon.is_some())
            .finish()
    }
}
