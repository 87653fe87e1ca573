// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::{BoxedInternalIterator, InternalIterator};
use crate::format::compare_internal_keys;
use crate::Comparator;
use std::cmp::Ordering;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Direction {
    Forward,
    Reverse,
}

/// Merges multiple internal iterators into one ordered cursor
///
/// Children must be individually sorted by internal key; the merge picks
/// the smallest (forward) or largest (reverse) current entry across all
/// of them. On a direction change, the non-current children are
/// re-positioned relative to the current key first.
pub struct MergingIter<'a, C: Comparator> {
    cmp: C,
    children: Vec<BoxedInternalIterator<'a>>,
    current: Option<usize>,
    direction: Direction,
}

impl<'a, C: Comparator> MergingIter<'a, C> {
    /// Creates a merging cursor over the given children.
    #[must_use]
    pub fn new(cmp: C, children: Vec<BoxedInternalIterator<'a>>) -> Self {
        Self {
            cmp,
            children,
            current: None,
            direction: Direction::Forward,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;

        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }

            smallest = match smallest {
                Some(best)
                    if compare_internal_keys(
                        &self.cmp,
                        child.key(),
                        self.children.get(best).map_or(&[], |c| c.key()),
                    ) != Ordering::Less =>
                {
                    Some(best)
                }
                _ => Some(idx),
            };
        }

        self.current = smallest;
    }

    fn find_largest(&mut self) {
        let mut largest: Option<usize> = None;

        // Rightmost wins ties so reverse iteration is stable
        for (idx, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }

            largest = match largest {
                Some(best)
                    if compare_internal_keys(
                        &self.cmp,
                        child.key(),
                        self.children.get(best).map_or(&[], |c| c.key()),
                    ) == Ordering::Less =>
                {
                    Some(best)
                }
                _ => Some(idx),
            };
        }

        self.current = largest;
    }
}

#[allow(clippy::indexing_slicing)]
impl<C: Comparator> InternalIterator for MergingIter<'_, C> {
    fn valid(&self) -> bool {
        self.current
            .is_some_and(|idx| self.children.get(idx).is_some_and(|c| c.valid()))
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn seek_to_last(&mut self) {
        for child in &mut self.children {
            child.seek_to_last();
        }
        self.direction = Direction::Reverse;
        self.find_largest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.direction = Direction::Forward;
        self.find_smallest();
    }

    fn next(&mut self) {
        let Some(current) = self.current else {
            return;
        };

        // Make sure all children are positioned after the current key.
        // True when moving forward already; after reverse iteration the
        // other children sit before the current key and must be brought
        // back over it.
        if self.direction != Direction::Forward {
            let key = self.children[current].key().to_vec();

            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx == current {
                    continue;
                }

                child.seek(&key);
                if child.valid()
                    && compare_internal_keys(&self.cmp, child.key(), &key) == Ordering::Equal
                {
                    child.next();
                }
            }

            self.direction = Direction::Forward;
        }

        self.children[current].next();
        self.find_smallest();
    }

    fn prev(&mut self) {
        let Some(current) = self.current else {
            return;
        };

        // Mirror image of `next`: bring all other children strictly
        // before the current key.
        if self.direction != Direction::Reverse {
            let key = self.children[current].key().to_vec();

            for (idx, child) in self.children.iter_mut().enumerate() {
                if idx == current {
                    continue;
                }

                child.seek(&key);
                if child.valid() {
                    // Child is at the first entry >= key; step back once
                    child.prev();
                } else {
                    // Child has nothing at or after key; its last entry
                    // is the one before it
                    child.seek_to_last();
                }
            }

            self.direction = Direction::Reverse;
        }

        self.children[current].prev();
        self.find_largest();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid(), "key() on invalid iterator");
        self.current
            .and_then(|idx| self.children.get(idx))
            .map_or(&[], |c| c.key())
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid(), "value() on invalid iterator");
        self.current
            .and_then(|idx| self.children.get(idx))
            .map_or(&[], |c| c.value())
    }

    fn status(&self) -> crate::Result<()> {
        for child in &self.children {
            child.status()?;
        }
        Ok(())
    }
}
