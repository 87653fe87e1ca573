// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::BoxedInternalIterator;
use crate::format::{
    append_internal_key, extract_user_key, parse_internal_key, SeqNo, ValueType,
    VALUE_TYPE_FOR_SEEK,
};
use crate::Comparator;
use std::cmp::Ordering;

/// How many entry bytes are read, on average, between two read samples
pub const READ_BYTES_PERIOD: u32 = 1 << 20;

// Saved-value buffers above this capacity are dropped instead of reused,
// so a long-lived iterator does not pin its peak allocation.
const LARGE_VALUE_CAPACITY: usize = 1 << 20;

/// Receives read samples for compaction hinting
///
/// Invoked with the encoded internal key currently being read. Sampling
/// is Bernoulli-style over bytes read, so hot ranges get sampled roughly
/// proportionally to how much they are read.
pub trait ReadSampler {
    /// Records that the given internal key was read.
    fn record_read_sample(&self, internal_key: &[u8]);
}

/// A sampler that discards all samples
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopSampler;

impl ReadSampler for NoopSampler {
    fn record_read_sample(&self, _internal_key: &[u8]) {}
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    // The base iterator is positioned at the entry that yields
    // `key()` / `value()`.
    Forward,

    // The base iterator is positioned just before all entries whose user
    // key equals `key()`; the exposed entry lives in `saved_key` /
    // `saved_value`.
    Reverse,
}

/// Snapshot-consistent, deduplicating cursor over a merged internal iterator
///
/// The layers below store every write as a separate version: the same
/// user key may occur once per overwrite, plus tombstones for deletions.
/// This cursor collapses them into the user-visible view at a fixed
/// sequence number: each live user key appears exactly once, carrying the
/// newest value visible at the snapshot; deleted and shadowed versions
/// are hidden.
///
/// Not thread-safe; one cursor is driven by one thread at a time.
pub struct DbIter<'a, C: Comparator> {
    cmp: C,
    iter: BoxedInternalIterator<'a>,
    sequence: SeqNo,
    sampler: Box<dyn ReadSampler + 'a>,

    status: Option<crate::Error>,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    direction: Direction,
    valid: bool,

    rng: oorandom::Rand32,
    bytes_until_read_sampling: u64,
}

impl<'a, C: Comparator> DbIter<'a, C> {
    /// Creates a cursor over `iter`, exposing the view at sequence
    /// number `sequence`.
    ///
    /// The cursor takes ownership of the base iterator and tears it down
    /// on drop. `seed` randomizes read sampling.
    #[must_use]
    pub fn new(
        cmp: C,
        iter: BoxedInternalIterator<'a>,
        sequence: SeqNo,
        sampler: Box<dyn ReadSampler + 'a>,
        seed: u64,
    ) -> Self {
        let mut rng = oorandom::Rand32::new(seed);
        let bytes_until_read_sampling = random_sampling_period(&mut rng);

        Self {
            cmp,
            iter,
            sequence,
            sampler,
            status: None,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            direction: Direction::Forward,
            valid: false,
            rng,
            bytes_until_read_sampling,
        }
    }

    /// Returns `true` if the cursor points at an entry.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.valid
    }

    /// Returns the user key of the current entry.
    #[must_use]
    pub fn key(&self) -> &[u8] {
        debug_assert!(self.valid, "key() on invalid iterator");
        match self.direction {
            Direction::Forward => extract_user_key(self.iter.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Returns the value of the current entry.
    #[must_use]
    pub fn value(&self) -> &[u8] {
        debug_assert!(self.valid, "value() on invalid iterator");
        match self.direction {
            Direction::Forward => self.iter.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    /// Returns the first error observed by this cursor or its base.
    ///
    /// Corruption is sticky: once a malformed key was seen, this keeps
    /// returning the error and the cursor stays invalid.
    ///
    /// # Errors
    ///
    /// Returns the stored error, if any.
    pub fn status(&self) -> crate::Result<()> {
        match &self.status {
            Some(e) => Err(e.clone()),
            None => self.iter.status(),
        }
    }

    /// Positions the cursor at the first visible entry.
    pub fn seek_to_first(&mut self) {
        if self.failed() {
            return;
        }

        self.direction = Direction::Forward;
        self.clear_saved_value();
        self.iter.seek_to_first();

        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    /// Positions the cursor at the last visible entry.
    pub fn seek_to_last(&mut self) {
        if self.failed() {
            return;
        }

        self.direction = Direction::Reverse;
        self.clear_saved_value();
        self.iter.seek_to_last();
        self.find_prev_user_entry();
    }

    /// Positions the cursor at the first visible entry with user key >=
    /// `target`.
    pub fn seek(&mut self, target: &[u8]) {
        if self.failed() {
            return;
        }

        self.direction = Direction::Forward;
        self.clear_saved_value();

        // Build the internal seek target: at this user key, versions
        // above the snapshot sort first and must be skipped over
        self.saved_key.clear();
        append_internal_key(&mut self.saved_key, target, self.sequence, VALUE_TYPE_FOR_SEEK);
        self.iter.seek(&self.saved_key);

        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    /// Moves to the next visible entry.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        debug_assert!(self.valid, "next() on invalid iterator");
        if !self.valid {
            return;
        }

        if self.direction == Direction::Reverse {
            self.direction = Direction::Forward;

            // The base iterator sits just before the entries of the
            // current key; step into them so the skip loop below can walk
            // past all of its versions. `saved_key` already holds the key
            // to skip.
            if self.iter.valid() {
                self.iter.next();
            } else {
                self.iter.seek_to_first();
            }

            if !self.iter.valid() {
                self.valid = false;
                self.saved_key.clear();
                return;
            }
        } else {
            // Remember the current key so all of its other versions get
            // skipped
            let Some(()) = self.save_current_user_key() else {
                return;
            };
        }

        self.find_next_user_entry(true);
    }

    /// Moves to the previous visible entry.
    pub fn prev(&mut self) {
        debug_assert!(self.valid, "prev() on invalid iterator");
        if !self.valid {
            return;
        }

        if self.direction == Direction::Forward {
            // The base iterator is at the current entry. Walk backwards
            // out of the current key's version range, then scan.
            debug_assert!(self.iter.valid());

            let Some(()) = self.save_current_user_key() else {
                return;
            };

            loop {
                self.iter.prev();

                if !self.iter.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.clear_saved_value();
                    return;
                }

                if self
                    .cmp
                    .compare(extract_user_key(self.iter.key()), &self.saved_key)
                    == Ordering::Less
                {
                    break;
                }
            }

            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
    }

    /// Scans forward from the base position to the next entry that is
    /// visible at the snapshot and not shadowed by a deletion.
    ///
    /// `saved_key` doubles as the skip buffer: while `skipping` is set,
    /// entries whose user key is <= `saved_key` are hidden.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert_eq!(Direction::Forward, self.direction);
        debug_assert!(self.iter.valid());

        loop {
            let Some((seqno, value_type)) = self.parse_key() else {
                // Corruption; already invalidated
                return;
            };

            if seqno <= self.sequence {
                match value_type {
                    ValueType::Deletion => {
                        // Every older version of this key is hidden by
                        // this tombstone
                        self.saved_key.clear();

                        // NOTE: disjoint field borrows
                        let user_key = extract_user_key(self.iter.key());
                        self.saved_key.extend_from_slice(user_key);

                        skipping = true;
                    }
                    ValueType::Value => {
                        let hidden = skipping
                            && self
                                .cmp
                                .compare(extract_user_key(self.iter.key()), &self.saved_key)
                                != Ordering::Greater;

                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return;
                        }
                    }
                }
            }

            self.iter.next();

            if !self.iter.valid() {
                break;
            }
        }

        self.saved_key.clear();
        self.valid = false;
    }

    /// Scans backward, accumulating the newest visible version of the
    /// current candidate key in `saved_key` / `saved_value`.
    ///
    /// Backward iteration sees a key's versions oldest-first, so the
    /// accumulator settles on the newest visible one and the scan only
    /// stops once a smaller user key shows up while a live value is held.
    fn find_prev_user_entry(&mut self) {
        debug_assert_eq!(Direction::Reverse, self.direction);

        let mut value_type = ValueType::Deletion;

        if self.iter.valid() {
            loop {
                let Some((seqno, entry_type)) = self.parse_key() else {
                    return;
                };

                if seqno <= self.sequence {
                    if value_type != ValueType::Deletion
                        && self
                            .cmp
                            .compare(extract_user_key(self.iter.key()), &self.saved_key)
                            == Ordering::Less
                    {
                        // Crossed into the previous user key with a live
                        // value accumulated
                        break;
                    }

                    value_type = entry_type;

                    if value_type == ValueType::Deletion {
                        self.saved_key.clear();
                        self.clear_saved_value();
                    } else {
                        if self.saved_value.capacity() > self.iter.value().len() + LARGE_VALUE_CAPACITY {
                            self.saved_value = Vec::new();
                        }

                        self.saved_key.clear();
                        self.saved_value.clear();

                        // NOTE: disjoint field borrows
                        let user_key = extract_user_key(self.iter.key());
                        self.saved_key.extend_from_slice(user_key);
                        self.saved_value.extend_from_slice(self.iter.value());
                    }
                }

                self.iter.prev();

                if !self.iter.valid() {
                    break;
                }
            }
        }

        if value_type == ValueType::Deletion {
            // End of the visible range
            self.valid = false;
            self.saved_key.clear();
            self.clear_saved_value();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }

    /// Parses the trailer of the base iterator's current key, charging
    /// its bytes against the read-sampling budget.
    ///
    /// On a malformed key, stores a sticky corruption status and
    /// invalidates the cursor.
    fn parse_key(&mut self) -> Option<(SeqNo, ValueType)> {
        let bytes_read = (self.iter.key().len() + self.iter.value().len()) as u64;

        while self.bytes_until_read_sampling < bytes_read {
            self.bytes_until_read_sampling += random_sampling_period(&mut self.rng);
            self.sampler.record_read_sample(self.iter.key());
        }
        self.bytes_until_read_sampling -= bytes_read;

        match parse_internal_key(self.iter.key()) {
            Ok(parsed) => Some((parsed.seqno, parsed.value_type)),
            Err(_) => {
                self.status = Some(crate::Error::Corruption(
                    "malformed internal key in DbIter",
                ));
                self.valid = false;
                None
            }
        }
    }

    /// Copies the current user key into `saved_key`, invalidating on a
    /// malformed key.
    fn save_current_user_key(&mut self) -> Option<()> {
        if parse_internal_key(self.iter.key()).is_err() {
            self.status = Some(crate::Error::Corruption(
                "malformed internal key in DbIter",
            ));
            self.valid = false;
            return None;
        }

        self.saved_key.clear();

        // NOTE: disjoint field borrows
        let user_key = extract_user_key(self.iter.key());
        self.saved_key.extend_from_slice(user_key);

        Some(())
    }

    fn clear_saved_value(&mut self) {
        if self.saved_value.capacity() > LARGE_VALUE_CAPACITY {
            self.saved_value = Vec::new();
        } else {
            self.saved_value.clear();
        }
    }

    /// Corruption is terminal: every later positioning attempt keeps the
    /// cursor invalid.
    fn failed(&mut self) -> bool {
        if self.status.is_some() {
            self.valid = false;
            true
        } else {
            false
        }
    }
}

impl<C: Comparator> std::fmt::Debug for DbIter<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIter")
            .field("sequence", &self.sequence)
            .field("direction", &self.direction)
            .field("valid", &self.valid)
            .finish()
    }
}

fn random_sampling_period(rng: &mut oorandom::Rand32) -> u64 {
    u64::from(rng.rand_range(0..2 * READ_BYTES_PERIOD))
}
