use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Case folding for case-insensitive token search.
///
/// UTF-8 tokens get full Unicode lowercasing, anything else ASCII folding.
pub struct LowercaseFilter;

fn fold(bytes: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(bytes) {
        Ok(text) => text.to_lowercase().into_bytes(),
        Err(err) => err.into_bytes().to_ascii_lowercase(),
    }
}

impl TokenFilter for LowercaseFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        tokens.into_iter()
            .map(|mut token| {
                token.bytes = fold(token.bytes);
                token
            })
            .collect()
    }

    fn normalize(&self, bytes: Vec<u8>) -> Vec<u8> {
        fold(bytes)
    }

    fn name(&self) -> &str {
        "lowercase"
    }

    fn clone_box(&self) -> Box<dyn TokenFilter> {
        Box::new(LowercaseFilter)
    }
}
