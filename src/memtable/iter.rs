// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::EntryRef;
use crate::iter::InternalIterator;
use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;
use std::ops::Bound;
use std::ptr::NonNull;

/// Bidirectional cursor over the entries of a memtable
///
/// Borrows the memtable; entries observed through it stay valid for the
/// cursor's lifetime because the backing arena never frees.
pub struct MemtableIter<'a> {
    items: &'a SkipMap<EntryRef, ()>,
    current: Option<Entry<'a, EntryRef, ()>>,
    lookup: Vec<u8>,
}

impl<'a> MemtableIter<'a> {
    pub(crate) fn new(items: &'a SkipMap<EntryRef, ()>) -> Self {
        Self {
            items,
            current: None,
            lookup: Vec::new(),
        }
    }
}

impl InternalIterator for MemtableIter<'_> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.current = self.items.front();
    }

    fn seek_to_last(&mut self) {
        self.current = self.items.back();
    }

    fn seek(&mut self, target: &[u8]) {
        // Skip-list entries are framed records, so the seek target gets
        // the same framing. The trailer is already part of `target`.
        self.lookup = frame_target(target);

        let Some(first) = self.lookup.first() else {
            self.current = None;
            return;
        };

        let lookup_ref = EntryRef {
            ptr: NonNull::from(first),
            #[expect(clippy::cast_possible_truncation, reason = "seek targets are tiny")]
            len: self.lookup.len() as u32,
        };

        self.current = self.items.lower_bound(Bound::Included(&lookup_ref));
    }

    fn next(&mut self) {
        self.current = self.current.as_ref().and_then(Entry::next);
    }

    fn prev(&mut self) {
        self.current = self.current.as_ref().and_then(Entry::prev);
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid(), "key() on invalid iterator");
        self.current.as_ref().map_or(&[], |e| e.key().internal_key())
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid(), "value() on invalid iterator");
        self.current.as_ref().map_or(&[], |e| e.key().value())
    }

    fn status(&self) -> crate::Result<()> {
        Ok(())
    }
}

/// Frames an encoded internal key as a record so it compares against
/// skip-list entries.
fn frame_target(target: &[u8]) -> Vec<u8> {
    use varint_rs::VarintWriter;

    let mut buf = Vec::with_capacity(target.len() + 6);

    #[expect(
        clippy::cast_possible_truncation,
        reason = "keys are far below 2^32 bytes"
    )]
    #[expect(clippy::expect_used, reason = "writing to a Vec cannot fail")]
    {
        buf.write_u32_varint(target.len() as u32)
            .expect("writing to a Vec cannot fail");
        buf.extend_from_slice(target);
        buf.write_u32_varint(0).expect("writing to a Vec cannot fail");
    }

    buf
}
