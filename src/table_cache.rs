// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::file::{legacy_table_file_path, table_file_path};
use crate::iter::{BoxedInternalIterator, EmptyIter};
use crate::table::{Table, TableIter};
use quick_cache::sync::{Cache as QuickCache, DefaultLifecycle};
use quick_cache::UnitWeighter;
use rustc_hash::FxBuildHasher;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// Cache key is the fixed-width little-endian encoding of the file number
#[derive(Clone, Debug, Eq, std::hash::Hash, PartialEq)]
struct CacheKey([u8; 8]);

impl From<u64> for CacheKey {
    fn from(file_number: u64) -> Self {
        Self(file_number.to_le_bytes())
    }
}

/// Caches open table handles to avoid paying the open-and-verify cost
/// on every read
///
/// Entries are shared `Table` handles. Eviction only drops the cache's
/// reference: readers that still hold a handle (point lookups in flight,
/// open iterators) keep the table and its file alive until they finish.
///
/// Open errors are never cached, so a transient failure or a repaired
/// file heals on the next access.
pub struct TableCache {
    folder: PathBuf,

    // NOTE: eviction mechanics are the cache implementation's concern
    cache: QuickCache<CacheKey, Arc<Table>, UnitWeighter, FxBuildHasher>,
}

impl TableCache {
    /// Creates a cache over table files in `folder`, bounded to
    /// `capacity` open handles.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn new(folder: impl Into<PathBuf>, capacity: usize) -> Self {
        #[expect(clippy::expect_used, reason = "a zero-capacity cache is a caller bug")]
        let opts = quick_cache::OptionsBuilder::new()
            .estimated_items_capacity(capacity)
            .weight_capacity(capacity as u64)
            .build()
            .expect("cache options should be valid");

        Self {
            folder: folder.into(),
            cache: QuickCache::with_options(
                opts,
                UnitWeighter,
                FxBuildHasher,
                DefaultLifecycle::default(),
            ),
        }
    }

    /// Number of cached table handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns `true` if no table handle is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Creates an iterator over the given table file.
    ///
    /// The iterator holds its table handle until dropped. If the table
    /// cannot be opened, the error is reported through the returned
    /// iterator's `status`.
    #[must_use]
    pub fn iter(&self, file_number: u64, file_size: u64) -> BoxedInternalIterator<'static> {
        match self.find_table(file_number, file_size) {
            Ok(table) => Box::new(TableIter::new(table)),
            Err(e) => Box::new(EmptyIter::with_error(e)),
        }
    }

    /// Performs a point lookup in the given table file.
    ///
    /// On a hit, `saver` receives the found entry. The table handle is
    /// released before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the table cannot be opened or read.
    pub fn get<F: FnMut(&[u8], &[u8])>(
        &self,
        file_number: u64,
        file_size: u64,
        target: &[u8],
        saver: F,
    ) -> crate::Result<()> {
        let table = self.find_table(file_number, file_size)?;
        table.get(target, saver)
    }

    /// Drops the cached handle for the given table file.
    ///
    /// Outstanding references keep the underlying table alive until they
    /// are released.
    pub fn evict(&self, file_number: u64) {
        let _ = self.cache.remove(&CacheKey::from(file_number));
    }

    fn find_table(&self, file_number: u64, file_size: u64) -> crate::Result<Arc<Table>> {
        let key = CacheKey::from(file_number);

        if let Some(table) = self.cache.get(&key) {
            return Ok(table);
        }

        log::trace!("table cache miss for file #{file_number}");

        let table = Arc::new(self.open_table(file_number, file_size)?);
        self.cache.insert(key, table.clone());

        Ok(table)
    }

    fn open_table(&self, file_number: u64, file_size: u64) -> crate::Result<Table> {
        let file = match File::open(table_file_path(&self.folder, file_number)) {
            Ok(file) => file,
            Err(primary_error) => {
                // Tables written by earlier versions carry a different
                // file name
                match File::open(legacy_table_file_path(&self.folder, file_number)) {
                    Ok(file) => file,
                    Err(_) => return Err(primary_error.into()),
                }
            }
        };

        Table::open(file, file_size)
    }
}

impl std::fmt::Debug for TableCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCache")
            .field("folder", &self.folder)
            .field("len", &self.len())
            .finish()
    }
}
