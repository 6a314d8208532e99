use chrono::{DateTime, Utc};
use crc32fast::Hasher;
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::StoreKind;
use crate::storage::block_store::BlockRef;

/// File header, always at offset 0.
///
/// [ magic | version | body fields ... | crc32 ] padded to `Header::SIZE`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
    pub kind: u8,
    pub clean: bool,            // Cleared while a writer is attached
    pub block_size: u32,
    pub gram_len: u32,
    pub record_count: u64,
    pub table_root: BlockRef,   // Bucket array extent
    pub bucket_count: u64,
    pub index_root: BlockRef,   // Term directory extent
    pub free_root: BlockRef,    // Persisted free list extent
    pub generation: u64,        // Bumped on every index flush
    pub last_sync_millis: i64,
    pub total_blocks: u64,      // Blocks in use by the store, header included
}

impl Header {
    pub const MAGIC: [u8; 8] = *b"DYSTOPIA";
    pub const VERSION: u32 = 1;
    pub const SIZE: usize = 128; // Fixed on-disk footprint

    pub fn new(kind: StoreKind, block_size: usize, gram_len: usize) -> Self {
        Header {
            magic: Self::MAGIC,
            version: Self::VERSION,
            kind: kind.code(),
            clean: true,
            block_size: block_size as u32,
            gram_len: gram_len as u32,
            record_count: 0,
            table_root: BlockRef::NULL,
            bucket_count: 0,
            index_root: BlockRef::NULL,
            free_root: BlockRef::NULL,
            generation: 0,
            last_sync_millis: 0,
            total_blocks: Self::blocks_for(block_size),
        }
    }

    /// Number of leading blocks reserved for the header
    pub fn blocks_for(block_size: usize) -> u64 {
        Self::SIZE.div_ceil(block_size) as u64
    }

    pub fn store_kind(&self) -> Result<StoreKind> {
        StoreKind::from_code(self.kind)
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        if self.last_sync_millis == 0 {
            return None;
        }
        DateTime::from_timestamp_millis(self.last_sync_millis)
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut data = bincode::serialize(self)?;

        let mut hasher = Hasher::new();
        hasher.update(&data);
        data.extend_from_slice(&hasher.finalize().to_le_bytes());

        if data.len() > Self::SIZE {
            return Err(Error::new(ErrorKind::Internal, format!("header encodes to {} bytes", data.len())));
        }
        data.resize(Self::SIZE, 0);
        Ok(data)
    }

    /// Magic and version are checked before the body, so a newer layout fails
    /// closed with `UnsupportedVersion` instead of being misread.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 12 || data[..8] != Self::MAGIC {
            return Err(Error::corrupt("not a dystopia file (bad magic)".to_string()));
        }

        let version = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        if version != Self::VERSION {
            return Err(Error::new(
                ErrorKind::UnsupportedVersion,
                format!("file format version {} (supported: {})", version, Self::VERSION),
            ));
        }

        let header: Header = bincode::deserialize(data)?;
        let body_len = bincode::serialized_size(&header)? as usize;
        if data.len() < body_len + 4 {
            return Err(Error::corrupt("truncated header".to_string()));
        }

        let stored = u32::from_le_bytes([
            data[body_len],
            data[body_len + 1],
            data[body_len + 2],
            data[body_len + 3],
        ]);
        let mut hasher = Hasher::new();
        hasher.update(&data[..body_len]);
        if hasher.finalize() != stored {
            return Err(Error::corrupt("header checksum mismatch".to_string()));
        }

        Ok(header)
    }
}
