use crate::core::error::{Error, Result};

/// How a search pattern is matched against records.
///
/// Q-gram modes (`Exact`, `Prefix`, `Suffix`, `Substr`, `FuzzyExact`) compare
/// raw field bytes. Token modes compare normalized tokens, so they follow the
/// configured case folding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchMode {
    /// A field equals the pattern
    Exact,
    /// A field starts with the pattern
    Prefix,
    /// A field ends with the pattern
    Suffix,
    /// A field contains the pattern
    Substr,
    /// A token equals the pattern
    Token,
    /// A token starts with the pattern
    TokenPrefix,
    /// A token ends with the pattern
    TokenSuffix,
    /// A token is within `max_distance` edits of the pattern
    Fuzzy { max_distance: u8 },
    /// A whole field is within `max_distance` byte edits of the pattern
    FuzzyExact { max_distance: u8 },
}

impl SearchMode {
    pub const MAX_DISTANCE: u8 = 2;

    pub fn validate(&self, pattern: &[u8]) -> Result<()> {
        if pattern.is_empty() {
            return Err(Error::invalid(format!("empty pattern for {:?} search", self)));
        }
        if let Some(d) = self.max_distance() {
            if d > Self::MAX_DISTANCE {
                return Err(Error::invalid(format!(
                    "edit distance {} exceeds the maximum of {}",
                    d,
                    Self::MAX_DISTANCE
                )));
            }
        }
        Ok(())
    }

    pub fn max_distance(&self) -> Option<u8> {
        match self {
            SearchMode::Fuzzy { max_distance } | SearchMode::FuzzyExact { max_distance } => Some(*max_distance),
            _ => None,
        }
    }

    pub fn is_token_mode(&self) -> bool {
        matches!(
            self,
            SearchMode::Token | SearchMode::TokenPrefix | SearchMode::TokenSuffix | SearchMode::Fuzzy { .. }
        )
    }

    /// Whether index candidates are exact without looking at payloads.
    pub fn is_lossless(&self) -> bool {
        self.is_token_mode()
    }
}
