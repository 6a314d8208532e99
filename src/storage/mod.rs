pub mod block_store;
pub mod file_lock;
pub mod header;
pub mod medium;
pub mod record_table;
