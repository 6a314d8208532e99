use crate::analysis::token::Token;
use unicode_segmentation::UnicodeSegmentation;

/// Which tokenizer builds the token index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    /// Split on whitespace and ASCII punctuation bytes
    Separators,
    /// Unicode word boundaries for UTF-8 fields
    Unicode,
}

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, field: usize, text: &[u8]) -> Vec<Token>;

    fn name(&self) -> &str;

    fn clone_box(&self) -> Box<dyn Tokenizer>;
}

/// Byte-class tokenizer. Bytes >= 0x80 are never separators, so UTF-8
/// sequences stay inside their token.
#[derive(Clone)]
pub struct SeparatorTokenizer {
    separators: [bool; 256],
}

impl SeparatorTokenizer {
    pub fn new(extra: &[u8]) -> Self {
        let mut separators = [false; 256];
        for byte in 0u8..=127 {
            if byte.is_ascii_whitespace() || byte.is_ascii_punctuation() || byte.is_ascii_control() {
                separators[byte as usize] = true;
            }
        }
        for &byte in extra {
            separators[byte as usize] = true;
        }
        SeparatorTokenizer { separators }
    }

    pub fn is_separator(&self, byte: u8) -> bool {
        self.separators[byte as usize]
    }
}

impl Default for SeparatorTokenizer {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl Tokenizer for SeparatorTokenizer {
    fn tokenize(&self, field: usize, text: &[u8]) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut position = 0u32;
        let mut start: Option<usize> = None;

        for (i, &byte) in text.iter().enumerate() {
            match (self.is_separator(byte), start) {
                (true, Some(s)) => {
                    tokens.push(Token::new(text[s..i].to_vec(), position, s, field));
                    position += 1;
                    start = None;
                }
                (false, None) => start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = start {
            tokens.push(Token::new(text[s..].to_vec(), position, s, field));
        }

        tokens
    }

    fn name(&self) -> &str {
        "separators"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(self.clone())
    }
}

/// Standard Unicode tokenizer. Words are split again on the extra separator
/// bytes. Fields that are not valid UTF-8 fall back to the separator rules.
#[derive(Clone, Default)]
pub struct StandardTokenizer {
    extra: Vec<u8>,
    fallback: SeparatorTokenizer,
}

impl StandardTokenizer {
    pub fn new(extra: &[u8]) -> Self {
        StandardTokenizer {
            extra: extra.to_vec(),
            fallback: SeparatorTokenizer::new(extra),
        }
    }
}

impl Tokenizer for StandardTokenizer {
    fn tokenize(&self, field: usize, text: &[u8]) -> Vec<Token> {
        let text_str = match std::str::from_utf8(text) {
            Ok(s) => s,
            Err(_) => return self.fallback.tokenize(field, text),
        };

        let mut tokens = Vec::new();
        for (offset, word) in text_str.unicode_word_indices() {
            let word = word.as_bytes();
            let mut start = 0;
            for end in 0..=word.len() {
                if end < word.len() && !self.extra.contains(&word[end]) {
                    continue;
                }
                if end > start {
                    let position = tokens.len() as u32;
                    tokens.push(Token::new(word[start..end].to_vec(), position, offset + start, field));
                }
                start = end + 1;
            }
        }
        tokens
    }

    fn name(&self) -> &str {
        "standard"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(self.clone())
    }
}
