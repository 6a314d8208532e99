use std::collections::BTreeSet;
use crate::index::term::{Term, TermKind};

/// Fixed-length byte q-gram extraction.
///
/// Per field it emits every window as a `Gram`, the first and last window as
/// `Head`/`Tail`, and fields shorter than the window as a single `Whole`
/// term. Windows never cross field boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QGramExtractor {
    pub gram_len: usize,
}

impl QGramExtractor {
    pub fn new(gram_len: usize) -> Self {
        QGramExtractor { gram_len }
    }

    pub fn extract(&self, field: &[u8], out: &mut BTreeSet<Term>) {
        let n = self.gram_len;
        if field.len() < n {
            out.insert(Term::new(TermKind::Whole, field));
            return;
        }

        for window in field.windows(n) {
            out.insert(Term::new(TermKind::Gram, window));
        }
        out.insert(Term::new(TermKind::Head, &field[..n]));
        out.insert(Term::new(TermKind::Tail, &field[field.len() - n..]));
    }

    /// Distinct interior grams of a query pattern, in first-seen order.
    pub fn pattern_grams(&self, pattern: &[u8]) -> Vec<Term> {
        let mut seen = BTreeSet::new();
        pattern
            .windows(self.gram_len)
            .map(|w| Term::new(TermKind::Gram, w))
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    pub fn head(&self, pattern: &[u8]) -> Option<Term> {
        (pattern.len() >= self.gram_len).then(|| Term::new(TermKind::Head, &pattern[..self.gram_len]))
    }

    pub fn tail(&self, pattern: &[u8]) -> Option<Term> {
        (pattern.len() >= self.gram_len)
            .then(|| Term::new(TermKind::Tail, &pattern[pattern.len() - self.gram_len..]))
    }
}
