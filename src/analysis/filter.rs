use crate::analysis::token::Token;

pub trait TokenFilter: Send + Sync {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token>;

    /// Normalize a single query token the same way indexed tokens are
    fn normalize(&self, bytes: Vec<u8>) -> Vec<u8>;

    fn name(&self) -> &str;

    fn clone_box(&self) -> Box<dyn TokenFilter>;
}
