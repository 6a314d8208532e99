use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Drops tokens longer than `max_len` bytes.
pub struct LengthFilter {
    pub max_len: usize,
}

impl TokenFilter for LengthFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens.into_iter().filter(|t| t.len() <= self.max_len).collect()
    }

    fn normalize(&self, bytes: Vec<u8>) -> Vec<u8> {
        bytes
    }

    fn name(&self) -> &str {
        "length"
    }

    fn clone_box(&self) -> Box<dyn TokenFilter> {
        Box::new(LengthFilter { max_len: self.max_len })
    }
}
