// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::Table;
use crate::iter::InternalIterator;
use std::sync::Arc;

/// Bidirectional cursor over one table
///
/// Holds a reference to its table, which doubles as the cache handle
/// when created through the table cache: the table (and its file) stay
/// alive until every iterator over it is dropped, even if the cache
/// entry was evicted in the meantime.
pub struct TableIter {
    table: Arc<Table>,
    pos: Option<usize>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    status: Option<crate::Error>,
}

impl TableIter {
    /// Creates a cursor over the given table.
    #[must_use]
    pub fn new(table: Arc<Table>) -> Self {
        Self {
            table,
            pos: None,
            current: None,
            status: None,
        }
    }

    /// Loads the record at `pos`, invalidating on read failure.
    fn load(&mut self, pos: usize) {
        if pos >= self.table.len() {
            self.pos = None;
            self.current = None;
            return;
        }

        match self.table.read_record(pos) {
            Ok(record) => {
                self.pos = Some(pos);
                self.current = Some(record);
            }
            Err(e) => {
                self.pos = None;
                self.current = None;
                self.status = Some(e);
            }
        }
    }
}

impl InternalIterator for TableIter {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        if self.status.is_some() {
            return;
        }
        self.load(0);
    }

    fn seek_to_last(&mut self) {
        if self.status.is_some() {
            return;
        }

        match self.table.len().checked_sub(1) {
            Some(last) => self.load(last),
            None => {
                self.pos = None;
                self.current = None;
            }
        }
    }

    fn seek(&mut self, target: &[u8]) {
        if self.status.is_some() {
            return;
        }

        match self.table.find_greater_or_equal(target) {
            Ok(Some(pos)) => self.load(pos),
            Ok(None) => {
                self.pos = None;
                self.current = None;
            }
            Err(e) => {
                self.pos = None;
                self.current = None;
                self.status = Some(e);
            }
        }
    }

    fn next(&mut self) {
        let Some(pos) = self.pos else {
            return;
        };
        self.load(pos + 1);
    }

    fn prev(&mut self) {
        let Some(pos) = self.pos else {
            return;
        };

        match pos.checked_sub(1) {
            Some(prev) => self.load(prev),
            None => {
                self.pos = None;
                self.current = None;
            }
        }
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid(), "key() on invalid iterator");
        self.current.as_ref().map_or(&[], |(key, _)| key)
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid(), "value() on invalid iterator");
        self.current.as_ref().map_or(&[], |(_, value)| value)
    }

    fn status(&self) -> crate::Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
