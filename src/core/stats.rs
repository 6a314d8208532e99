use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

/// Store statistics for monitoring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    // Records
    pub record_count: u64,
    pub bucket_count: u64,

    // Index
    pub term_count: usize,
    pub gram_terms: usize,
    pub token_terms: usize,
    pub index_generation: u64,

    // Storage
    pub block_size: usize,
    pub total_blocks: u64,
    pub free_blocks: u64,
    pub file_size_bytes: u64,

    // Lifecycle
    pub writable: bool,
    pub locked: bool,
    pub needs_repair: bool,
    pub last_sync: Option<DateTime<Utc>>,
}

impl StoreStats {
    /// Share of allocated blocks sitting on the free list
    pub fn fragmentation(&self) -> f64 {
        if self.total_blocks == 0 {
            return 0.0;
        }
        self.free_blocks as f64 / self.total_blocks as f64
    }
}
