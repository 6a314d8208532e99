use std::path::Path;
use tracing::warn;
use crate::core::config::{Config, OpenMode};
use crate::core::database::{Database, Scan};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::StoreStats;
use crate::core::types::{Record, RecordId, StoreKind};
use crate::search::mode::SearchMode;

/// Tagged database: each record is an ordered sequence of byte fields.
///
/// Grams never span two fields. `search` matches a record when any field
/// matches; `search_field` looks at one field only.
pub struct JDB {
    db: Option<Database>,
    config: Config,
}

fn to_fields<F: AsRef<[u8]>>(fields: &[F]) -> Vec<Vec<u8>> {
    fields.iter().map(|f| f.as_ref().to_vec()).collect()
}

impl Default for JDB {
    fn default() -> Self {
        Self::new()
    }
}

impl JDB {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        JDB { db: None, config }
    }

    pub fn open<P: AsRef<Path>>(&mut self, path: P, mode: OpenMode) -> Result<()> {
        if self.db.is_some() {
            return Err(Error::new(ErrorKind::AlreadyOpen, "JDB handle is already open".to_string()));
        }
        self.db = Some(Database::open(path.as_ref(), mode, self.config.clone(), StoreKind::Jdb)?);
        Ok(())
    }

    pub fn open_in_memory(&mut self) -> Result<()> {
        if self.db.is_some() {
            return Err(Error::new(ErrorKind::AlreadyOpen, "JDB handle is already open".to_string()));
        }
        self.db = Some(Database::open_in_memory(self.config.clone(), StoreKind::Jdb)?);
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

    /// Store `fields` under `id`, returning the fields they replaced.
    pub fn put<F: AsRef<[u8]>>(&mut self, id: RecordId, fields: &[F]) -> Result<Option<Vec<Vec<u8>>>> {
        self.db_mut()?.put(id, &to_fields(fields))
    }

    pub fn get(&self, id: RecordId) -> Result<Option<Vec<Vec<u8>>>> {
        self.db()?.get(id)
    }

    pub fn out(&mut self, id: RecordId) -> Result<Option<Vec<Vec<u8>>>> {
        self.db_mut()?.out(id)
    }

    /// Ids with at least one matching field, ascending.
    pub fn search(&self, pattern: &[u8], mode: SearchMode) -> Result<Vec<RecordId>> {
        self.db()?.search(pattern, mode, None)
    }

    /// Ids whose field at position `field` matches. Records with fewer
    /// fields never match.
    pub fn search_field(&self, field: usize, pattern: &[u8], mode: SearchMode) -> Result<Vec<RecordId>> {
        self.db()?.search(pattern, mode, Some(field))
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

impl Drop for JDB {
    fn drop(&mut self) {
        if let Some(db) = self.db.take() {
            if let Err(e) = db.close() {
                warn!(error = %e, "failed to close JDB on drop");
            }
        }
    }
}

/// Iterator over stored records, see `JDB::iter`.
pub struct Iter<'a> {
    scan: Option<Scan<'a>>,
    error: Option<Error>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }
        self.scan.as_mut()?.next()
    }
}

impl<'a> IntoIterator for &'a JDB {
    type Item = Result<Record>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
