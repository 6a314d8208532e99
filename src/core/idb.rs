use std::path::Path;
use tracing::warn;
use crate::core::config::{Config, OpenMode};
use crate::core::database::{Database, Scan};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::StoreStats;
use crate::core::types::{RecordId, StoreKind};
use crate::search::mode::SearchMode;

/// Indexed database: one opaque payload per record id, searchable by
/// substring, token and edit distance.
///
/// ```no_run
/// use dystopia::{IDB, OpenMode, SearchMode};
///
/// let mut idb = IDB::new();
/// idb.open("casket.idb", OpenMode::writer_create())?;
/// idb.put(1234, b"hello world")?;
/// assert_eq!(idb.search(b"world", SearchMode::Substr)?, vec![1234]);
/// idb.close()?;
/// # Ok::<(), dystopia::Error>(())
/// ```
pub struct IDB {
    db: Option<Database>,
    config: Config,
}

fn into_payload(fields: Vec<Vec<u8>>) -> Vec<u8> {
    fields.into_iter().next().unwrap_or_default()
}

impl Default for IDB {
    fn default() -> Self {
        Self::new()
    }
}

impl IDB {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creation-time settings (block size, gram length) only apply to new files.
    pub fn with_config(config: Config) -> Self {
        IDB { db: None, config }
    }

    pub fn open<P: AsRef<Path>>(&mut self, path: P, mode: OpenMode) -> Result<()> {
        if self.db.is_some() {
            return Err(Error::new(ErrorKind::AlreadyOpen, "IDB handle is already open".to_string()));
        }
        self.db = Some(Database::open(path.as_ref(), mode, self.config.clone(), StoreKind::Idb)?);
        Ok(())
    }

    pub fn open_in_memory(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Err(Error::new(ErrorKind::AlreadyOpen, "IDB handle is already open".to_string()));
        }
        self.db = Some(Database::open_in_memory(self.config.clone(), StoreKind::Idb)?);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.db.take().ok_or_else(Error::not_open)?.close()
    }

    pub fn is_open(&self) -> bool {
        self.db.is_some()
    }

    fn db(&self) -> Result<&Database> {
        self.db.as_ref().ok_or_else(Error::not_open)
    }

    fn db_mut(&mut self) -> Result<&mut Database> {
        self.db.as_mut().ok_or_else(Error::not_open)
    }

    /// Store `payload` under `id`, returning the payload it replaced.
    pub fn put(&mut self, id: RecordId, payload: &[u8]) -> Result<Option<Vec<u8>>> {
        let old = self.db_mut()?.put(id, &[payload.to_vec()])?;
        Ok(old.map(into_payload))
    }

    pub fn get(&self, id: RecordId) -> Result<Option<Vec<u8>>> {
        Ok(self.db()?.get(id)?.map(into_payload))
    }

    pub fn out(&mut self, id: RecordId) -> Result<Option<Vec<u8>>> {
        Ok(self.db_mut()?.out(id)?.map(into_payload))
    }

    /// Matching ids, ascending.
    pub fn search(&self, pattern: &[u8], mode: SearchMode) -> Result<Vec<RecordId>> {
        self.db()?.search(pattern, mode, None)
    }

    pub fn count(&self) -> Result<u64> {
        Ok(self.db()?.count())
    }

    pub fn contains(&self, id: RecordId) -> Result<bool> {
        self.db()?.contains(id)
    }

    pub fn ids(&self) -> Result<Vec<RecordId>> {
        self.db()?.ids()
    }

    /// Records in ascending id order. A closed handle yields one `NotOpen` error.
    pub fn iter(&self) -> Iter<'_> {
        match self.db().and_then(|db| db.scan()) {
            Ok(scan) => Iter { scan: Some(scan), error: None },
            Err(e) => Iter { scan: None, error: Some(e) },
        }
    }

    pub fn sync(&mut self) -> Result<()> {
        self.db_mut()?.sync()
    }

    pub fn vanish(&mut self) -> Result<()> {
        self.db_mut()?.vanish()
    }

    pub fn copy<P: AsRef<Path>>(&mut self, dest: P) -> Result<()> {
        self.db_mut()?.copy(dest.as_ref())
    }

    pub fn rebuild_index(&mut self) -> Result<()> {
        self.db_mut()?.rebuild_index()
    }

    /// True when this writer found the file not closed cleanly.
    pub fn needs_repair(&self) -> Result<bool> {
        Ok(self.db()?.needs_repair())
    }

    pub fn refresh(&mut self) -> Result<()> {
        self.db_mut()?.refresh()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(self.db()?.stats())
    }

    pub fn path(&self) -> Option<&Path> {
        self.db.as_ref().and_then(|db| db.path())
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(self.db()?.file_size())
    }
}

impl Drop for IDB {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            if let Err(e) = db.close() {
                warn!(error = %e, "failed to close IDB on drop");
            }
        }
    }
}

/// Iterator over `(id, payload)` pairs, see `IDB::iter`.
pub struct Iter<'a> {
    scan: Option<Scan<'a>>,
    error: Option<Error>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<(RecordId, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }
        let record = self.scan.as_mut()?.next()?;
        Some(record.map(|r| (r.id, into_payload(r.fields))))
    }
}

impl<'a> IntoIterator for &'a IDB {
    type Item = Result<(RecordId, Vec<u8>)>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
