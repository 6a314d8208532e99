use std::collections::HashMap;
use roaring::RoaringTreemap;
use tracing::trace;
use crate::analysis::analyzer::Analyzer;
use crate::core::error::Result;
use crate::core::types::RecordId;
use crate::index::inverted::InvertedIndex;
use crate::index::posting::PostingList;
use crate::index::term::{Term, TermKind};
use crate::search::fuzzy::{within_distance, FuzzyAutomaton};
use crate::search::mode::SearchMode;

/// Read access to stored records, as needed for verification.
pub trait RecordSource {
    /// Every live id, ascending
    fn ids(&self) -> Result<Vec<RecordId>>;

    fn contains(&self, id: RecordId) -> Result<bool>;

    /// Fields of a live record, `None` if the id has no value
    fn fields(&self, id: RecordId) -> Result<Option<Vec<Vec<u8>>>>;
}

/// Candidate set resolved from the index
#[derive(Debug, Clone, PartialEq)]
pub enum Candidates {
    /// The index cannot narrow this query down; scan every record
    All,
    Ids(RoaringTreemap),
}

/// Resolves a pattern to ascending record ids: candidates from the inverted
/// index, then verification against stored fields where the mode is lossy.
pub struct SearchExecutor<'a> {
    index: &'a InvertedIndex,
    analyzer: &'a Analyzer,
    transpositions: bool,
}

impl<'a> SearchExecutor<'a> {
    pub fn new(index: &'a InvertedIndex, analyzer: &'a Analyzer, transpositions: bool) -> Self {
        SearchExecutor {
            index,
            analyzer,
            transpositions,
        }
    }

    /// Search every field, or only `field` when given.
    pub fn execute<S: RecordSource>(
        &self,
        source: &S,
        pattern: &[u8],
        mode: SearchMode,
        field: Option<usize>,
    ) -> Result<Vec<RecordId>> {
        mode.validate(pattern)?;

        let pattern = if mode.is_token_mode() {
            self.analyzer.normalize_token(pattern)
        } else {
            pattern.to_vec()
        };

        let ids: Vec<RecordId> = match self.candidates(&pattern, mode)? {
            Candidates::All => source.ids()?,
            Candidates::Ids(set) => set.iter().collect(),
        };
        trace!(?mode, candidates = ids.len(), "search candidates resolved");

        let matcher = Matcher::new(self.analyzer, &pattern, mode, self.transpositions);
        let verify = field.is_some() || !mode.is_lossless();
        let mut hits = Vec::new();

        for id in ids {
            if !verify {
                // Postings can outlive a crashed writer; never report dead ids
                if source.contains(id)? {
                    hits.push(id);
                }
                continue;
            }

            let fields = match source.fields(id)? {
                Some(fields) => fields,
                None => continue,
            };
            let hit = match field {
                Some(i) => fields.get(i).is_some_and(|f| matcher.matches(f)),
                None => fields.iter().any(|f| matcher.matches(f)),
            };
            if hit {
                hits.push(id);
            }
        }

        Ok(hits)
    }

    /// Superset of the matching ids, or `All` when a full scan is needed.
    pub fn candidates(&self, pattern: &[u8], mode: SearchMode) -> Result<Candidates> {
        let q = self.analyzer.gram_len();
        let qgrams = &self.analyzer.qgrams;
        let short = pattern.len() < q;

        let set = match mode {
            SearchMode::Exact if short => self.lookup(&Term::new(TermKind::Whole, pattern)),
            SearchMode::Exact => {
                let mut terms = qgrams.pattern_grams(pattern);
                terms.extend(qgrams.head(pattern));
                terms.extend(qgrams.tail(pattern));
                self.intersect(&terms)
            }
            SearchMode::Prefix if short => union(
                self.index
                    .kind_range(TermKind::Head, pattern)
                    .chain(self.index.kind_range(TermKind::Whole, pattern))
                    .map(|(_, list)| list),
            ),
            SearchMode::Prefix => {
                let mut terms = qgrams.pattern_grams(pattern);
                terms.extend(qgrams.head(pattern));
                self.intersect(&terms)
            }
            SearchMode::Suffix if short => union(
                self.index
                    .kind_range(TermKind::Tail, &[])
                    .chain(self.index.kind_range(TermKind::Whole, &[]))
                    .filter(|(term, _)| term.body().ends_with(pattern))
                    .map(|(_, list)| list),
            ),
            SearchMode::Suffix => {
                let mut terms = qgrams.pattern_grams(pattern);
                terms.extend(qgrams.tail(pattern));
                self.intersect(&terms)
            }
            SearchMode::Substr if short => union(
                self.index
                    .kind_range(TermKind::Gram, &[])
                    .chain(self.index.kind_range(TermKind::Whole, &[]))
                    .filter(|(term, _)| contains(term.body(), pattern))
                    .map(|(_, list)| list),
            ),
            SearchMode::Substr => self.intersect(&qgrams.pattern_grams(pattern)),
            SearchMode::Token => self.lookup(&Term::new(TermKind::Token, pattern)),
            SearchMode::TokenPrefix => self.union_tokens(self.index.tokens_with_prefix(pattern)?),
            SearchMode::TokenSuffix => {
                self.union_tokens(self.index.tokens_matching(|token| token.ends_with(pattern))?)
            }
            SearchMode::Fuzzy { max_distance } => {
                let automaton = FuzzyAutomaton::new(pattern, max_distance, self.transpositions);
                self.union_tokens(self.index.tokens_matching(|token| automaton.matches(token))?)
            }
            SearchMode::FuzzyExact { max_distance } => {
                return Ok(self.count_filter(pattern, max_distance as usize));
            }
        };

        Ok(Candidates::Ids(set))
    }

    fn lookup(&self, term: &Term) -> RoaringTreemap {
        self.index
            .lookup(term)
            .map(PostingList::to_bitmap)
            .unwrap_or_default()
    }

    /// Intersection of the lists of `terms`. Any missing term empties it.
    fn intersect(&self, terms: &[Term]) -> RoaringTreemap {
        let mut lists = Vec::with_capacity(terms.len());
        for term in terms {
            match self.index.lookup(term) {
                Some(list) => lists.push(list),
                None => return RoaringTreemap::new(),
            }
        }
        // Start from the rarest term
        lists.sort_by_key(|list| list.len());

        let mut iter = lists.into_iter();
        let mut result = match iter.next() {
            Some(list) => list.to_bitmap(),
            None => return RoaringTreemap::new(),
        };
        for list in iter {
            if result.is_empty() {
                break;
            }
            result &= list.to_bitmap();
        }
        result
    }

    fn union_tokens(&self, tokens: Vec<Vec<u8>>) -> RoaringTreemap {
        union(
            tokens
                .iter()
                .filter_map(|token| self.index.lookup(&Term::new(TermKind::Token, token))),
        )
    }

    /// A field within `k` edits of the pattern keeps at least
    /// `|G| - k * w` of the pattern's distinct grams G, where one edit
    /// touches at most `w` windows (`gram_len`, plus one for a transposition).
    fn count_filter(&self, pattern: &[u8], k: usize) -> Candidates {
        let grams = self.analyzer.qgrams.pattern_grams(pattern);
        let width = self.analyzer.gram_len() + usize::from(self.transpositions);
        let threshold = grams.len() as isize - (k * width) as isize;
        if threshold <= 0 {
            return Candidates::All;
        }

        let mut counts: HashMap<RecordId, usize> = HashMap::new();
        for term in &grams {
            if let Some(list) = self.index.lookup(term) {
                for &id in &list.ids {
                    *counts.entry(id).or_insert(0) += 1;
                }
            }
        }

        Candidates::Ids(
            counts
                .into_iter()
                .filter(|&(_, n)| n as isize >= threshold)
                .map(|(id, _)| id)
                .collect(),
        )
    }
}

fn union<'a, I>(lists: I) -> RoaringTreemap
where
    I: Iterator<Item = &'a PostingList>,
{
    let mut result = RoaringTreemap::new();
    for list in lists {
        result.extend(list.ids.iter().copied());
    }
    result
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

/// Per-field verification of one query.
struct Matcher<'a> {
    analyzer: &'a Analyzer,
    pattern: &'a [u8],
    mode: SearchMode,
    transpositions: bool,
    automaton: Option<FuzzyAutomaton>,
}

impl<'a> Matcher<'a> {
    fn new(analyzer: &'a Analyzer, pattern: &'a [u8], mode: SearchMode, transpositions: bool) -> Self {
        let automaton = match mode {
            SearchMode::Fuzzy { max_distance } => Some(FuzzyAutomaton::new(pattern, max_distance, transpositions)),
            _ => None,
        };
        Matcher {
            analyzer,
            pattern,
            mode,
            transpositions,
            automaton,
        }
    }

    fn matches(&self, field: &[u8]) -> bool {
        let pattern = self.pattern;
        match self.mode {
            SearchMode::Exact => field == pattern,
            SearchMode::Prefix => field.starts_with(pattern),
            SearchMode::Suffix => field.ends_with(pattern),
            SearchMode::Substr => contains(field, pattern),
            SearchMode::FuzzyExact { max_distance } => {
                within_distance(field, pattern, max_distance as usize, self.transpositions)
            }
            SearchMode::Token => self.any_token(field, |t| t == pattern),
            SearchMode::TokenPrefix => self.any_token(field, |t| t.starts_with(pattern)),
            SearchMode::TokenSuffix => self.any_token(field, |t| t.ends_with(pattern)),
            SearchMode::Fuzzy { .. } => match &self.automaton {
                Some(automaton) => self.any_token(field, |t| automaton.matches(t)),
                None => false,
            },
        }
    }

    fn any_token<F>(&self, field: &[u8], accept: F) -> bool
    where
        F: Fn(&[u8]) -> bool,
    {
        // Field position does not matter here
        self.analyzer
            .tokens(0, field)
            .iter()
            .any(|token| accept(&token.bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use crate::core::config::Config;
    use crate::core::error::ErrorKind;

    struct MemorySource {
        records: BTreeMap<RecordId, Vec<Vec<u8>>>,
    }

    impl RecordSource for MemorySource {
        fn ids(&self) -> Result<Vec<RecordId>> {
            Ok(self.records.keys().copied().collect())
        }

        fn contains(&self, id: RecordId) -> Result<bool> {
            Ok(self.records.contains_key(&id))
        }

        fn fields(&self, id: RecordId) -> Result<Option<Vec<Vec<u8>>>> {
            Ok(self.records.get(&id).cloned())
        }
    }

    fn build(records: &[(RecordId, &[&str])]) -> (MemorySource, InvertedIndex, Analyzer) {
        let analyzer = Analyzer::from_config(&Config::default(), 2);
        let mut index = InvertedIndex::new();
        let mut source = MemorySource { records: BTreeMap::new() };

        for (id, fields) in records {
            let fields: Vec<Vec<u8>> = fields.iter().map(|f| f.as_bytes().to_vec()).collect();
            index.index(*id, &analyzer.terms(&fields));
            source.records.insert(*id, fields);
        }
        (source, index, analyzer)
    }

    fn search(records: &[(RecordId, &[&str])], pattern: &str, mode: SearchMode) -> Vec<RecordId> {
        let (source, index, analyzer) = build(records);
        SearchExecutor::new(&index, &analyzer, true)
            .execute(&source, pattern.as_bytes(), mode, None)
            .unwrap()
    }

    const DOCS: &[(RecordId, &[&str])] = &[
        (1, &["hello world"]),
        (2, &["goodbye world"]),
        (3, &["Hello"]),
        (4, &["w"]),
        (5, &["worldwide web"]),
    ];

    #[test]
    fn test_substr() {
        assert_eq!(search(DOCS, "world", SearchMode::Substr), vec![1, 2, 5]);
        assert_eq!(search(DOCS, "lo w", SearchMode::Substr), vec![1]);
        // Shorter than a gram
        assert_eq!(search(DOCS, "w", SearchMode::Substr), vec![1, 2, 4, 5]);
        assert!(search(DOCS, "xyz", SearchMode::Substr).is_empty());
    }

    #[test]
    fn test_exact_prefix_suffix() {
        assert_eq!(search(DOCS, "Hello", SearchMode::Exact), vec![3]);
        assert_eq!(search(DOCS, "w", SearchMode::Exact), vec![4]);
        assert_eq!(search(DOCS, "hello", SearchMode::Prefix), vec![1]);
        assert_eq!(search(DOCS, "w", SearchMode::Prefix), vec![4, 5]);
        assert_eq!(search(DOCS, "world", SearchMode::Suffix), vec![1, 2]);
        assert_eq!(search(DOCS, "b", SearchMode::Suffix), vec![5]);
    }

    #[test]
    fn test_token_modes_fold_case() {
        assert_eq!(search(DOCS, "HELLO", SearchMode::Token), vec![1, 3]);
        assert_eq!(search(DOCS, "wor", SearchMode::TokenPrefix), vec![1, 2, 5]);
        assert_eq!(search(DOCS, "bye", SearchMode::TokenSuffix), vec![2]);
        // "world" appears as a substring of "worldwide" but not as a token there
        assert_eq!(search(DOCS, "world", SearchMode::Token), vec![1, 2]);
    }

    #[test]
    fn test_fuzzy_modes() {
        assert_eq!(search(DOCS, "wrold", SearchMode::Fuzzy { max_distance: 1 }), vec![1, 2]);
        assert_eq!(search(DOCS, "helo", SearchMode::Fuzzy { max_distance: 1 }), vec![1, 3]);
        assert_eq!(search(DOCS, "hello wrld", SearchMode::FuzzyExact { max_distance: 1 }), vec![1]);
        assert_eq!(search(DOCS, "Hallo", SearchMode::FuzzyExact { max_distance: 1 }), vec![3]);
        assert!(search(DOCS, "Hxllx", SearchMode::FuzzyExact { max_distance: 1 }).is_empty());
    }

    #[test]
    fn test_field_scoped_search() {
        let docs: &[(RecordId, &[&str])] = &[(1, &["alpha", "beta"]), (2, &["beta", "alpha"])];
        let (source, index, analyzer) = build(docs);
        let executor = SearchExecutor::new(&index, &analyzer, true);

        assert_eq!(executor.execute(&source, b"alpha", SearchMode::Exact, Some(0)).unwrap(), vec![1]);
        assert_eq!(executor.execute(&source, b"alpha", SearchMode::Token, Some(1)).unwrap(), vec![2]);
        assert!(executor.execute(&source, b"alpha", SearchMode::Exact, Some(7)).unwrap().is_empty());
        assert_eq!(executor.execute(&source, b"alpha", SearchMode::Exact, None).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_stale_postings_are_filtered() {
        let (mut source, index, analyzer) = build(DOCS);
        source.records.remove(&1);
        let executor = SearchExecutor::new(&index, &analyzer, true);
        assert_eq!(executor.execute(&source, b"world", SearchMode::Token, None).unwrap(), vec![2]);
        assert_eq!(executor.execute(&source, b"world", SearchMode::Substr, None).unwrap(), vec![2, 5]);
    }

    #[test]
    fn test_count_filter_falls_back_to_scan() {
        let (_, index, analyzer) = build(DOCS);
        let executor = SearchExecutor::new(&index, &analyzer, true);
        assert_eq!(
            executor.candidates(b"abc", SearchMode::FuzzyExact { max_distance: 1 }).unwrap(),
            Candidates::All
        );
        assert!(matches!(
            executor.candidates(b"hello world", SearchMode::FuzzyExact { max_distance: 1 }).unwrap(),
            Candidates::Ids(_)
        ));
    }

    #[test]
    fn test_invalid_queries() {
        let (source, index, analyzer) = build(DOCS);
        let executor = SearchExecutor::new(&index, &analyzer, true);
        let err = executor.execute(&source, b"", SearchMode::Substr, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }
}
