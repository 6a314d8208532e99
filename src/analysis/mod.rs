pub mod analyzer;
pub mod filter;
pub mod filters;
pub mod qgram;
pub mod token;
pub mod tokenizer;
