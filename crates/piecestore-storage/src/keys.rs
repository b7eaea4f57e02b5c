//! Content key layout
//!
//! Keys are designed for prefix scanning in the content table:
//! - Object prefix: `{info_hash}` (20 bytes)
//! - Piece prefix: `{info_hash}{piece_index:be32}` (24 bytes)
//! - Chunk key: `{info_hash}{piece_index:be32}{chunk_index:be16}` (26 bytes)
//!
//! All keys are pure functions of their inputs; there is no separate record
//! of which objects or pieces exist.

use piecestore_common::{Error, INFO_HASH_LEN, InfoHash, PieceIndex, Result};

/// Length of a piece prefix
pub const PIECE_PREFIX_LEN: usize = INFO_HASH_LEN + 4;

/// Length of a chunk key
pub const CHUNK_KEY_LEN: usize = PIECE_PREFIX_LEN + 2;

/// Piece prefix under which all chunks of one piece are stored.
///
/// This is also the value a sequence record points at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentKey([u8; PIECE_PREFIX_LEN]);

impl ContentKey {
    /// Derive the key of a piece
    #[must_use]
    pub fn new(info_hash: &InfoHash, piece_index: PieceIndex) -> Self {
        let mut key = [0u8; PIECE_PREFIX_LEN];
        key[..INFO_HASH_LEN].copy_from_slice(info_hash.as_bytes());
        key[INFO_HASH_LEN..].copy_from_slice(&piece_index.to_be_bytes()); // Big-endian for sorting
        Self(key)
    }

    /// Parse a key read back from the sequence table
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; PIECE_PREFIX_LEN] = bytes.try_into().map_err(|_| {
            Error::invalid_argument(format!(
                "content key must be {PIECE_PREFIX_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self(key))
    }

    /// Key of one chunk of this piece
    #[must_use]
    pub fn chunk(&self, chunk_index: u16) -> ChunkKey {
        let mut key = [0u8; CHUNK_KEY_LEN];
        key[..PIECE_PREFIX_LEN].copy_from_slice(&self.0);
        key[PIECE_PREFIX_LEN..].copy_from_slice(&chunk_index.to_be_bytes());
        ChunkKey(key)
    }

    /// Object this piece belongs to
    #[must_use]
    pub fn info_hash(&self) -> InfoHash {
        let mut hash = [0u8; INFO_HASH_LEN];
        hash.copy_from_slice(&self.0[..INFO_HASH_LEN]);
        InfoHash::new(hash)
    }

    /// Index of the piece within its object
    #[must_use]
    pub fn piece_index(&self) -> PieceIndex {
        let mut index = [0u8; 4];
        index.copy_from_slice(&self.0[INFO_HASH_LEN..]);
        PieceIndex::from_be_bytes(index)
    }

    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Key of a single stored chunk
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey([u8; CHUNK_KEY_LEN]);

impl ChunkKey {
    /// Get the raw bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(n: u8) -> InfoHash {
        InfoHash::new([n; INFO_HASH_LEN])
    }

    #[test]
    fn test_content_key_is_deterministic() {
        assert_eq!(ContentKey::new(&hash(1), 7), ContentKey::new(&hash(1), 7));
        assert_ne!(ContentKey::new(&hash(1), 7), ContentKey::new(&hash(1), 8));
        assert_ne!(ContentKey::new(&hash(1), 7), ContentKey::new(&hash(2), 7));
    }

    #[test]
    fn test_content_key_parts() {
        let key = ContentKey::new(&hash(9), 0x0102_0304);
        assert_eq!(key.info_hash(), hash(9));
        assert_eq!(key.piece_index(), 0x0102_0304);
        assert_eq!(&key.as_bytes()[INFO_HASH_LEN..], &[1, 2, 3, 4]);
        assert_eq!(ContentKey::from_slice(key.as_bytes()).unwrap(), key);
        assert!(ContentKey::from_slice(&key.as_bytes()[1..]).is_err());
    }

    #[test]
    fn test_chunk_keys_share_piece_prefix() {
        let piece = ContentKey::new(&hash(3), 42);
        let first = piece.chunk(0);
        let second = piece.chunk(1);
        assert!(first.as_bytes().starts_with(piece.as_bytes()));
        assert!(second.as_bytes().starts_with(piece.as_bytes()));
        assert!(first < second);
        assert!(piece.as_bytes().starts_with(hash(3).as_bytes()));
    }

    #[test]
    fn test_piece_order_follows_index() {
        let low = ContentKey::new(&hash(3), 255);
        let high = ContentKey::new(&hash(3), 256);
        assert!(low.chunk(u16::MAX) < high.chunk(0));
    }
}
