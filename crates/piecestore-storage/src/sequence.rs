//! Monotonic sequence key generator
//!
//! Every piece gets a [`SequenceKey`] stamped on its first write. Keys are
//! the current Unix time in seconds, bumped to `last + 1` whenever the clock
//! has not moved past the last issued key, so concurrent writers always get
//! distinct, strictly increasing keys without touching the database.
//!
//! The key space is 32 bits. Once `u32::MAX` has been issued the generator
//! refuses to hand out more keys ([`Error::SequenceExhausted`]) instead of
//! wrapping, because a wrapped key would sort before every live record and be
//! evicted first. Under bursty load keys run ahead of the clock, so the
//! practical bound is roughly `u32::MAX - unix_now` (about 2.5 billion) piece
//! writes over the life of a store file.

use parking_lot::Mutex;
use piecestore_common::{Error, Result, SequenceKey};
use std::time::{SystemTime, UNIX_EPOCH};

/// Issues unique, strictly increasing sequence keys.
///
/// One generator is owned by each store; stores in the same process do not
/// share state.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    last: Mutex<u32>,
}

impl SequenceGenerator {
    /// Create a generator that has issued nothing yet
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose next key is greater than `last`
    #[must_use]
    pub const fn starting_after(last: SequenceKey) -> Self {
        Self {
            last: Mutex::new(last.get()),
        }
    }

    /// Issue the next key
    pub fn next(&self) -> Result<SequenceKey> {
        self.next_at(clock_now())
    }

    /// Last key issued (or the seed, if nothing was issued yet)
    pub fn last(&self) -> SequenceKey {
        SequenceKey::new(*self.last.lock())
    }

    #[cfg(test)]
    pub(crate) fn reseed(&self, last: SequenceKey) {
        *self.last.lock() = last.get();
    }

    fn next_at(&self, now: u32) -> Result<SequenceKey> {
        let mut last = self.last.lock();
        let key = if now > *last {
            now
        } else {
            last.checked_add(1)
                .ok_or(Error::SequenceExhausted { last: *last })?
        };
        *last = key;
        Ok(SequenceKey::new(key))
    }
}

/// Wall-clock seconds truncated to 32 bits (saturating; valid until 2106)
fn clock_now() -> u32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs());
    u32::try_from(secs).unwrap_or(u32::MAX)
}
