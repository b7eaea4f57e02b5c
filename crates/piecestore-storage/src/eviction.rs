//! Oldest-first eviction
//!
//! Eviction walks the sequence table in ascending key order (oldest first
//! write first) and deletes the content stored under each record's piece
//! prefix until the reclaim target is met. Reclaimed bytes are counted as
//! one nominal [`CHUNK_SIZE`] per deleted chunk, not the exact stored length.
//!
//! A sequence record is removed only together with the last chunk under its
//! prefix, in the same transaction, so a record never outlives its content
//! and content never loses its record. Reads do not refresh anything: this is
//! FIFO by first write, not LRU.

use crate::error::StoreResult;
use crate::tables::{CONTENT, SEQUENCE};
use piecestore_common::{CHUNK_SIZE, CapacityConfig};
use redb::{Database, Durability, ReadableTable, ReadableTableMetadata, WriteTransaction};
use tracing::{debug, info};

/// Outcome of one eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Stored content bytes observed before the pass
    pub size_before: u64,
    /// Nominal bytes the pass tried to reclaim
    pub target_bytes: u64,
    /// Chunks deleted
    pub evicted_chunks: u64,
    /// Nominal bytes reclaimed (`evicted_chunks * CHUNK_SIZE`)
    pub reclaimed_bytes: u64,
    /// Sequence records removed with their content
    pub sequence_records_removed: u64,
}

/// Stored bytes (keys and values) in the content table
pub(crate) fn content_size(db: &Database) -> StoreResult<u64> {
    let read_txn = db.begin_read()?;
    let table = read_txn.open_table(CONTENT)?;
    Ok(table.stats()?.stored_bytes())
}

/// Check the content size against the threshold and evict a quarter of the
/// threshold, oldest first, if it is exceeded.
///
/// Returns `None` when the store is within its budget.
pub(crate) fn enforce_capacity(
    db: &Database,
    capacity: &CapacityConfig,
) -> StoreResult<Option<EvictionReport>> {
    let size = content_size(db)?;
    if size <= capacity.threshold_bytes {
        debug!(
            "Content size {} within threshold {}",
            size, capacity.threshold_bytes
        );
        return Ok(None);
    }

    let mut report = evict(db, capacity.reclaim_target())?;
    report.size_before = size;
    info!(
        "Evicted {} chunks ({} bytes nominal, {} pieces): content size {} exceeded threshold {}",
        report.evicted_chunks,
        report.reclaimed_bytes,
        report.sequence_records_removed,
        size,
        capacity.threshold_bytes
    );
    Ok(Some(report))
}

/// Evict at least `target_bytes` (nominal) of the oldest content in one
/// transaction, or everything if less is stored.
pub(crate) fn evict(db: &Database, target_bytes: u64) -> StoreResult<EvictionReport> {
    let mut write_txn = db.begin_write()?;
    // Freed pages are only reused after a durable commit
    write_txn.set_durability(Durability::Immediate);
    let report = evict_oldest(&write_txn, target_bytes)?;
    write_txn.commit()?;
    Ok(report)
}

/// Delete content oldest-first within `txn` until `target_bytes` is reached
/// or the sequence table is exhausted.
pub(crate) fn evict_oldest(txn: &WriteTransaction, target_bytes: u64) -> StoreResult<EvictionReport> {
    let mut content = txn.open_table(CONTENT)?;
    let mut sequence = txn.open_table(SEQUENCE)?;
    let mut report = EvictionReport {
        target_bytes,
        ..EvictionReport::default()
    };

    while report.reclaimed_bytes < target_bytes {
        let Some((seq_key, prefix)) = sequence
            .first()?
            .map(|(k, v)| (*k.value(), v.value().to_vec()))
        else {
            break;
        };

        let budget = (target_bytes - report.reclaimed_bytes).div_ceil(CHUNK_SIZE as u64);
        let budget = usize::try_from(budget).unwrap_or(usize::MAX);
        // One extra key tells whether the prefix is drained by this pass
        let keys = keys_with_prefix(&content, &prefix, budget.saturating_add(1))?;
        let drained = keys.len() <= budget;

        for key in keys.iter().take(budget) {
            content.remove(key.as_slice())?;
            report.evicted_chunks += 1;
            report.reclaimed_bytes += CHUNK_SIZE as u64;
        }

        if !drained {
            // Target reached part way through this piece; its record stays
            // for the chunks that remain.
            break;
        }
        sequence.remove(&seq_key)?;
        report.sequence_records_removed += 1;
    }

    Ok(report)
}

/// Collect up to `limit` content keys starting with `prefix`, in key order.
pub(crate) fn keys_with_prefix(
    table: &impl ReadableTable<&'static [u8], &'static [u8]>,
    prefix: &[u8],
    limit: usize,
) -> StoreResult<Vec<Vec<u8>>> {
    let mut keys = Vec::new();
    for entry in table.range(prefix..)? {
        if keys.len() == limit {
            break;
        }
        let (key, _) = entry?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        keys.push(key.to_vec());
    }
    Ok(keys)
}
