pub mod config;
pub mod database;
pub mod error;
pub mod idb;
pub mod jdb;
pub mod stats;
pub mod types;
