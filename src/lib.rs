pub mod core;
pub mod storage;
pub mod analysis;
pub mod index;
pub mod search;
pub mod compression;

pub use crate::compression::compress::CompressionType;
pub use crate::core::config::{Config, OpenMode};
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::idb::IDB;
pub use crate::core::jdb::JDB;
pub use crate::core::stats::StoreStats;
pub use crate::core::types::{Record, RecordId};
pub use crate::analysis::tokenizer::TokenizerKind;
pub use crate::search::mode::SearchMode;

/*
┌──────────────────────────────────────────────────────────────────────────────┐
│                              DYSTOPIA LAYOUT                                 │
└──────────────────────────────────────────────────────────────────────────────┘

  IDB / JDB handles          open · put · get · out · search · iter · sync
        │
        ▼
  core::Database ───────────┬──────────────────────────┐
        │ 1. record table   │ 2. term diff             │ search
        ▼                   ▼                          ▼
  storage::RecordTable   index::InvertedIndex ◄── search::SearchExecutor
   hash buckets,          term → posting list,        candidates, then
   chained entries        FST token view              verification
        │                   │
        └────────┬──────────┘
                 ▼
  storage::BlockStore       extents of fixed-size blocks, first-fit free list
                 │
                 ▼
  storage::Medium           FileMedium (pread/pwrite) | MemoryMedium

  File: [header][bucket pages][entries][posting lists][term directory][free list]
*/
