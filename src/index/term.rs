use serde::{Deserialize, Serialize};

/// What a term was derived from. Encoded as the first byte of the term, so
/// each kind occupies its own contiguous range of the sorted dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// Any q-gram window of a field
    Gram,
    /// First q-gram window of a field
    Head,
    /// Last q-gram window of a field
    Tail,
    /// Entire field, when shorter than the gram length
    Whole,
    /// Normalized token
    Token,
}

impl TermKind {
    pub fn tag(&self) -> u8 {
        match self {
            TermKind::Gram => b'g',
            TermKind::Head => b'^',
            TermKind::Tail => b'$',
            TermKind::Whole => b'=',
            TermKind::Token => b't',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'g' => Some(TermKind::Gram),
            b'^' => Some(TermKind::Head),
            b'$' => Some(TermKind::Tail),
            b'=' => Some(TermKind::Whole),
            b't' => Some(TermKind::Token),
            _ => None,
        }
    }
}

/// Index term: kind tag followed by the raw body bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Term(Vec<u8>);

impl Term {
    pub fn new(kind: TermKind, body: &[u8]) -> Self {
        let mut bytes = Vec::with_capacity(body.len() + 1);
        bytes.push(kind.tag());
        bytes.extend_from_slice(body);
        Term(bytes)
    }

    pub fn kind(&self) -> Option<TermKind> {
        self.0.first().and_then(|&tag| TermKind::from_tag(tag))
    }

    pub fn body(&self) -> &[u8] {
        self.0.get(1..).unwrap_or(&[])
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
