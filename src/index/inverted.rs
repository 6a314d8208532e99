use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use fst::{IntoStreamer, Set, SetBuilder, Streamer};
use parking_lot::RwLock;
use tracing::debug;
use crate::core::error::{Error, Result};
use crate::core::types::RecordId;
use crate::index::posting::PostingList;
use crate::index::term::{Term, TermKind};
use crate::storage::block_store::{BlockRef, BlockStore};

/// Inverted index structure
///
/// Posting lists live in memory, keyed by a sorted term dictionary. Each list
/// is persisted as its own extent; the directory extent maps terms to those
/// extents and is what `Header::index_root` points at. Only lists touched
/// since the last flush are rewritten.
pub struct InvertedIndex {
    postings: BTreeMap<Term, PostingList>,
    stored: BTreeMap<Term, BlockRef>,
    dirty: BTreeSet<Term>,
    directory: BlockRef,
    generation: u64,
    /// Token dictionary as an FST, rebuilt lazily after token terms change
    token_set: RwLock<Option<Arc<Set<Vec<u8>>>>>,
}

impl Default for InvertedIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl InvertedIndex {
    pub fn new() -> Self {
        InvertedIndex {
            postings: BTreeMap::new(),
            stored: BTreeMap::new(),
            dirty: BTreeSet::new(),
            directory: BlockRef::NULL,
            generation: 0,
            token_set: RwLock::new(None),
        }
    }

    /// Read the persisted index referenced by the header.
    pub fn load(store: &BlockStore) -> Result<Self> {
        let mut index = InvertedIndex::new();
        index.generation = store.header.generation;
        index.directory = store.header.index_root;
        if index.directory.is_null() {
            return Ok(index);
        }

        let entries: Vec<(Term, BlockRef)> = bincode::deserialize(&store.read(index.directory)?)?;
        for (term, r) in entries {
            let list = PostingList::decode(&store.read(r)?)?;
            if list.is_empty() {
                return Err(Error::corrupt(format!("empty posting list stored at {:?}", r)));
            }
            index.postings.insert(term.clone(), list);
            index.stored.insert(term, r);
        }

        debug!(
            terms = index.postings.len(),
            generation = index.generation,
            "inverted index loaded"
        );
        Ok(index)
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn count_kind(&self, kind: TermKind) -> usize {
        self.kind_range(kind, &[]).count()
    }

    pub fn index<'a, I>(&mut self, id: RecordId, terms: I)
    where
        I: IntoIterator<Item = &'a Term>,
    {
        for term in terms {
            if term.kind() == Some(TermKind::Token) && !self.postings.contains_key(term) {
                self.invalidate_tokens();
            }
            if self.postings.entry(term.clone()).or_default().add(id) {
                self.dirty.insert(term.clone());
            }
        }
    }

    pub fn deindex<'a, I>(&mut self, id: RecordId, terms: I)
    where
        I: IntoIterator<Item = &'a Term>,
    {
        for term in terms {
            let emptied = match self.postings.get_mut(term) {
                Some(list) => {
                    if list.remove(id) {
                        self.dirty.insert(term.clone());
                        list.is_empty()
                    } else {
                        false
                    }
                }
                None => false,
            };
            if emptied {
                self.postings.remove(term);
                if term.kind() == Some(TermKind::Token) {
                    self.invalidate_tokens();
                }
            }
        }
    }

    pub fn lookup(&self, term: &Term) -> Option<&PostingList> {
        self.postings.get(term)
    }

    /// Every term of `kind` whose body starts with `prefix`, in term order.
    pub fn kind_range<'a>(
        &'a self,
        kind: TermKind,
        prefix: &[u8],
    ) -> impl Iterator<Item = (&'a Term, &'a PostingList)> + 'a {
        let start = Term::new(kind, prefix);
        let bound = start.as_bytes().to_vec();
        self.postings
            .range(start..)
            .take_while(move |(term, _)| term.as_bytes().starts_with(&bound))
    }

    fn invalidate_tokens(&self) {
        *self.token_set.write() = None;
    }

    fn token_set(&self) -> Result<Arc<Set<Vec<u8>>>> {
        if let Some(set) = self.token_set.read().as_ref() {
            return Ok(set.clone());
        }

        // Token terms share one tag, so their bodies come out sorted
        let mut builder = SetBuilder::memory();
        for (term, _) in self.kind_range(TermKind::Token, &[]) {
            builder.insert(term.body())?;
        }
        let set = Arc::new(builder.into_set());
        *self.token_set.write() = Some(set.clone());
        Ok(set)
    }

    /// Tokens starting with `prefix`, via an FST range scan.
    pub fn tokens_with_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>> {
        let set = self.token_set()?;
        let mut tokens = Vec::new();
        let mut stream = set.range().ge(prefix).into_stream();

        while let Some(token) = stream.next() {
            if !token.starts_with(prefix) {
                break;
            }
            tokens.push(token.to_vec());
        }

        Ok(tokens)
    }

    /// Tokens accepted by `accept`, visiting the whole token dictionary.
    pub fn tokens_matching<F>(&self, mut accept: F) -> Result<Vec<Vec<u8>>>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let set = self.token_set()?;
        let mut tokens = Vec::new();
        let mut stream = set.stream();

        while let Some(token) = stream.next() {
            if accept(token) {
                tokens.push(token.to_vec());
            }
        }

        Ok(tokens)
    }

    /// Write dirty posting lists and a new directory, then release the
    /// extents they replace. Bumps the generation when anything changed.
    pub fn flush(&mut self, store: &mut BlockStore) -> Result<()> {
        if self.dirty.is_empty() && self.directory == store.header.index_root {
            return Ok(());
        }

        let mut released = Vec::new();
        for term in std::mem::take(&mut self.dirty) {
            if let Some(old) = self.stored.remove(&term) {
                released.push(old);
            }
            if let Some(list) = self.postings.get(&term) {
                let r = store.store(&list.encode())?;
                self.stored.insert(term, r);
            }
        }

        let entries: Vec<(&Term, &BlockRef)> = self.stored.iter().collect();
        let directory = store.store(&bincode::serialize(&entries)?)?;
        if !self.directory.is_null() {
            released.push(self.directory);
        }
        self.directory = directory;

        self.generation += 1;
        store.header.index_root = directory;
        store.header.generation = self.generation;
        store.write_header()?;

        // Old extents stay intact until the header points past them
        for r in released {
            store.free(r)?;
        }

        debug!(
            terms = self.stored.len(),
            generation = self.generation,
            "inverted index flushed"
        );
        Ok(())
    }

    /// Drop every posting list, in memory and on disk.
    pub fn clear(&mut self, store: &mut BlockStore) -> Result<()> {
        let mut released: Vec<BlockRef> = self.stored.values().copied().collect();
        if !self.directory.is_null() {
            released.push(self.directory);
        }

        self.postings.clear();
        self.stored.clear();
        self.dirty.clear();
        self.directory = BlockRef::NULL;
        self.invalidate_tokens();

        self.generation += 1;
        store.header.index_root = BlockRef::NULL;
        store.header.generation = self.generation;
        store.write_header()?;

        for r in released {
            store.free(r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StoreKind;
    use crate::storage::medium::MemoryMedium;

    fn terms(words: &[&str]) -> Vec<Term> {
        words.iter().map(|w| Term::new(TermKind::Token, w.as_bytes())).collect()
    }

    fn memory_store() -> BlockStore {
        BlockStore::create(Box::new(MemoryMedium::new()), StoreKind::Idb, 64, 2, None).unwrap()
    }

    #[test]
    fn test_index_and_deindex() {
        let mut index = InvertedIndex::new();
        index.index(1, &terms(&["apple", "banana"]));
        index.index(2, &terms(&["apple"]));

        let apple = Term::new(TermKind::Token, b"apple");
        assert_eq!(index.lookup(&apple).unwrap().ids, vec![1, 2]);

        index.deindex(1, &terms(&["apple", "banana"]));
        assert_eq!(index.lookup(&apple).unwrap().ids, vec![2]);
        // Empty lists leave the dictionary
        assert!(index.lookup(&Term::new(TermKind::Token, b"banana")).is_none());
        assert_eq!(index.term_count(), 1);
    }

    #[test]
    fn test_deindex_of_absent_id_changes_nothing() {
        let mut store = memory_store();
        let mut index = InvertedIndex::new();
        index.index(1, &terms(&["kept"]));
        index.flush(&mut store).unwrap();

        index.deindex(7, &terms(&["kept", "never"]));
        index.flush(&mut store).unwrap();
        assert_eq!(index.generation(), 1);
        assert_eq!(index.lookup(&Term::new(TermKind::Token, b"kept")).unwrap().ids, vec![1]);

        index.deindex(1, &terms(&["kept"]));
        index.flush(&mut store).unwrap();
        assert_eq!(index.generation(), 2);
        assert_eq!(index.term_count(), 0);
    }

    #[test]
    fn test_kind_range_stays_within_kind() {
        let mut index = InvertedIndex::new();
        index.index(1, &[Term::new(TermKind::Gram, b"ab"), Term::new(TermKind::Gram, b"ac")]);
        index.index(2, &[Term::new(TermKind::Head, b"ab"), Term::new(TermKind::Gram, b"bc")]);

        let bodies: Vec<&[u8]> = index.kind_range(TermKind::Gram, b"a").map(|(t, _)| t.body()).collect();
        assert_eq!(bodies, vec![&b"ab"[..], b"ac"]);
        assert_eq!(index.count_kind(TermKind::Gram), 3);
        assert_eq!(index.count_kind(TermKind::Head), 1);
    }

    #[test]
    fn test_token_prefix_tracks_updates() {
        let mut index = InvertedIndex::new();
        index.index(1, &terms(&["prog", "program", "progress", "proxy"]));
        assert_eq!(
            index.tokens_with_prefix(b"progr").unwrap(),
            vec![b"program".to_vec(), b"progress".to_vec()]
        );

        // The cached FST must not serve removed or added tokens stale
        index.deindex(1, &terms(&["program"]));
        index.index(2, &terms(&["programmer"]));
        assert_eq!(
            index.tokens_with_prefix(b"progr").unwrap(),
            vec![b"programmer".to_vec(), b"progress".to_vec()]
        );
    }

    #[test]
    fn test_flush_and_load() {
        let mut store = memory_store();
        let mut index = InvertedIndex::new();
        index.index(1, &terms(&["alpha", "beta"]));
        index.index(5, &terms(&["beta"]));
        index.flush(&mut store).unwrap();
        assert_eq!(store.header.generation, 1);

        // Second flush rewrites only what changed
        index.deindex(1, &terms(&["alpha"]));
        index.index(9, &terms(&["gamma"]));
        index.flush(&mut store).unwrap();

        let loaded = InvertedIndex::load(&store).unwrap();
        assert_eq!(loaded.generation(), 2);
        assert!(loaded.lookup(&Term::new(TermKind::Token, b"alpha")).is_none());
        assert_eq!(loaded.lookup(&Term::new(TermKind::Token, b"beta")).unwrap().ids, vec![1, 5]);
        assert_eq!(loaded.lookup(&Term::new(TermKind::Token, b"gamma")).unwrap().ids, vec![9]);
    }

    #[test]
    fn test_clear_releases_extents() {
        let mut store = memory_store();
        let base = store.header.total_blocks;
        let mut index = InvertedIndex::new();
        index.index(1, &terms(&["one", "two", "three"]));
        index.flush(&mut store).unwrap();
        assert!(store.header.total_blocks > base);

        index.clear(&mut store).unwrap();
        assert_eq!(store.header.total_blocks, base);
        assert!(store.header.index_root.is_null());
        assert_eq!(InvertedIndex::load(&store).unwrap().term_count(), 0);
    }
}
