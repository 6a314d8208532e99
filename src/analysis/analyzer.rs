use std::collections::BTreeSet;
use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::length::LengthFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::qgram::QGramExtractor;
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{SeparatorTokenizer, StandardTokenizer, Tokenizer, TokenizerKind};
use crate::core::config::Config;
use crate::index::term::{Term, TermKind};

/// Term set of one record. Ordered, so diffs and persistence are stable.
pub type TermSet = BTreeSet<Term>;

/// Text analysis pipeline: token stream plus q-gram windows.
pub struct Analyzer {
    pub tokenizer: Box<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
    pub qgrams: QGramExtractor,
}

impl Analyzer {
    pub fn new(tokenizer: Box<dyn Tokenizer>, gram_len: usize) -> Self {
        Analyzer {
            tokenizer,
            filters: Vec::new(),
            qgrams: QGramExtractor::new(gram_len),
        }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// `gram_len` comes from the file header, not the config, once a store exists.
    pub fn from_config(config: &Config, gram_len: usize) -> Self {
        let tokenizer: Box<dyn Tokenizer> = match config.tokenizer {
            TokenizerKind::Separators => Box::new(SeparatorTokenizer::new(&config.extra_separators)),
            TokenizerKind::Unicode => Box::new(StandardTokenizer::new(&config.extra_separators)),
        };

        let mut analyzer = Analyzer::new(tokenizer, gram_len);
        // Folding can change byte length, so it runs before the length check
        if config.case_insensitive {
            analyzer = analyzer.add_filter(Box::new(LowercaseFilter));
        }
        analyzer.add_filter(Box::new(LengthFilter { max_len: config.max_token_len }))
    }

    pub fn gram_len(&self) -> usize {
        self.qgrams.gram_len
    }

    pub fn tokens(&self, field: usize, text: &[u8]) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(field, text);

        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        tokens
    }

    /// Normalize a query token so it compares equal to indexed tokens.
    pub fn normalize_token(&self, pattern: &[u8]) -> Vec<u8> {
        self.filters
            .iter()
            .fold(pattern.to_vec(), |bytes, filter| filter.normalize(bytes))
    }

    /// Every index term of a record's fields. Deterministic for equal input.
    pub fn terms(&self, fields: &[Vec<u8>]) -> TermSet {
        let mut terms = TermSet::new();

        for (i, field) in fields.iter().enumerate() {
            self.qgrams.extract(field, &mut terms);
            for token in self.tokens(i, field) {
                terms.insert(Term::new(TermKind::Token, &token.bytes));
            }
        }

        terms
    }
}

impl Clone for Analyzer {
    fn clone(&self) -> Self {
        Analyzer {
            tokenizer: self.tokenizer.clone_box(),
            filters: self.filters.iter().map(|f| f.clone_box()).collect(),
            qgrams: self.qgrams,
        }
    }
}
