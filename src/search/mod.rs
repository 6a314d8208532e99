pub mod executor;
pub mod fuzzy;
pub mod mode;
