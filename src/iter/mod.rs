// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

pub mod db_iter;
pub mod merge;

/// A bidirectional, seekable cursor over internal entries
///
/// Keys are encoded internal keys (user key plus trailer), sorted by
/// user key ascending, then sequence number descending. Implementations
/// are cursors rather than streams: they stay positioned at an entry
/// until moved, and may be re-seeked at any time.
///
/// After any positioning operation, `valid` tells whether the cursor
/// points at an entry. `key` and `value` may only be called while valid.
pub trait InternalIterator {
    /// Returns `true` if the cursor points at an entry.
    fn valid(&self) -> bool;

    /// Positions the cursor at the first entry.
    fn seek_to_first(&mut self);

    /// Positions the cursor at the last entry.
    fn seek_to_last(&mut self);

    /// Positions the cursor at the first entry at or after `target`.
    ///
    /// `target` is an encoded internal key.
    fn seek(&mut self, target: &[u8]);

    /// Moves to the next entry.
    fn next(&mut self);

    /// Moves to the previous entry.
    fn prev(&mut self);

    /// Returns the encoded internal key of the current entry.
    fn key(&self) -> &[u8];

    /// Returns the value of the current entry.
    fn value(&self) -> &[u8];

    /// Returns the first error this cursor ran into, if any.
    fn status(&self) -> crate::Result<()>;
}

/// Boxed internal iterator
pub type BoxedInternalIterator<'a> = Box<dyn InternalIterator + 'a>;

/// An iterator over nothing, optionally carrying an error
///
/// Stands in for an iterator that could not be constructed, so open
/// failures surface through the regular `status` channel.
#[derive(Debug, Default)]
pub struct EmptyIter {
    status: Option<crate::Error>,
}

impl EmptyIter {
    /// Creates an empty iterator whose `status` reports the given error.
    #[must_use]
    pub fn with_error(error: crate::Error) -> Self {
        Self {
            status: Some(error),
        }
    }
}

impl InternalIterator for EmptyIter {
    fn valid(&self) -> bool {
        false
    }

    fn seek_to_first(&mut self) {}

    fn seek_to_last(&mut self) {}

    fn seek(&mut self, _target: &[u8]) {}

    fn next(&mut self) {}

    fn prev(&mut self) {}

    fn key(&self) -> &[u8] {
        debug_assert!(false, "key() on invalid iterator");
        &[]
    }

    fn value(&self) -> &[u8] {
        debug_assert!(false, "value() on invalid iterator");
        &[]
    }

    fn status(&self) -> crate::Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn empty_iter() {
        let mut iter = EmptyIter::default();
        iter.seek_to_first();
        assert!(!iter.valid());
        assert!(iter.status().is_ok());
    }

    #[test]
    fn empty_iter_with_error() {
        let mut iter = EmptyIter::with_error(crate::Error::Corruption("broken"));
        iter.seek_to_first();
        iter.seek(b"a");
        assert!(!iter.valid());
        assert!(iter.status().is_err());
    }
}
