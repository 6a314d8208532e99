use crate::analysis::tokenizer::TokenizerKind;
use crate::compression::compress::CompressionType;
use crate::core::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Config {
    // Block storage
    pub block_size: usize,              // Bytes per block, fixed at creation
    pub capacity: Option<u64>,          // Max medium size in bytes, None = grow freely
    pub sync_on_write: bool,            // fsync after every mutation

    // Record table
    pub initial_buckets: u64,
    pub load_factor: f64,               // Rehash when records > buckets * load_factor
    pub compression: CompressionType,   // Codec for newly written payloads

    // Analysis
    pub gram_len: usize,                // q-gram length, fixed at creation
    pub tokenizer: TokenizerKind,
    pub case_insensitive: bool,
    pub max_token_len: usize,
    pub extra_separators: Vec<u8>,

    // Search
    pub fuzzy_transpositions: bool,     // teh -> the costs one edit

    // Maintenance
    pub rebuild_threads: usize,         // 0 = rayon default
}

impl Default for Config {
    fn default() -> Self {
        Config {
            block_size: 128,
            capacity: None,
            sync_on_write: false,

            initial_buckets: 1024,
            load_factor: 2.0,
            compression: CompressionType::None,

            gram_len: 2,
            tokenizer: TokenizerKind::Separators,
            case_insensitive: true,
            max_token_len: 255,
            extra_separators: Vec::new(),

            fuzzy_transpositions: true,

            rebuild_threads: 0,
        }
    }
}

impl Config {
    pub const MIN_BLOCK_SIZE: usize = 64;
    pub const MAX_GRAM_LEN: usize = 4;

    pub fn validate(&self) -> Result<()> {
        if self.block_size < Self::MIN_BLOCK_SIZE || !self.block_size.is_power_of_two() {
            return Err(Error::invalid(format!(
                "block_size must be a power of two >= {}, got {}",
                Self::MIN_BLOCK_SIZE,
                self.block_size
            )));
        }
        if self.gram_len == 0 || self.gram_len > Self::MAX_GRAM_LEN {
            return Err(Error::invalid(format!(
                "gram_len must be within 1..={}, got {}",
                Self::MAX_GRAM_LEN,
                self.gram_len
            )));
        }
        if self.initial_buckets == 0 {
            return Err(Error::invalid("initial_buckets must be positive".to_string()));
        }
        if !(self.load_factor > 0.0) {
            return Err(Error::invalid(format!("load_factor must be positive, got {}", self.load_factor)));
        }
        if self.max_token_len == 0 {
            return Err(Error::invalid("max_token_len must be positive".to_string()));
        }
        Ok(())
    }
}

/// Open flags. `create` and `truncate` are only honoured together with `writer`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenMode {
    pub reader: bool,
    pub writer: bool,
    pub create: bool,
    pub truncate: bool,
    pub no_lock: bool,
}

impl OpenMode {
    pub fn reader() -> Self {
        OpenMode { reader: true, ..Default::default() }
    }

    pub fn writer() -> Self {
        OpenMode { reader: true, writer: true, ..Default::default() }
    }

    pub fn writer_create() -> Self {
        OpenMode { create: true, ..Self::writer() }
    }

    pub fn with_truncate(mut self) -> Self {
        self.truncate = true;
        self
    }

    pub fn with_no_lock(mut self) -> Self {
        self.no_lock = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.reader && !self.writer {
            return Err(Error::invalid("open mode needs reader or writer".to_string()));
        }
        if (self.create || self.truncate) && !self.writer {
            return Err(Error::invalid("create/truncate require writer mode".to_string()));
        }
        Ok(())
    }
}
