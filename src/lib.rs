// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Read path primitives for log-structured merge trees (LSM-trees/LSMTs).
//!
//! ##### NOTE
//!
//! > This crate only provides the read side of an LSM-based storage
//! > engine, not the engine itself. It has no write-ahead log, no
//! > compaction scheduler and no recovery; those live a layer above.
//!
//! ##### About
//!
//! An LSM-tree engine stores every write as a separate, immutable
//! version: a `(user key, sequence number, value type)` internal entry.
//! Overwrites add versions, deletes add tombstones, and the same user
//! key may be present in the write buffer ([`Memtable`]) and several
//! on-disk tables at once.
//!
//! This crate implements the machinery that turns that soup back into a
//! clean, ordered key-value view:
//!
//! - [`DbIter`] - a bidirectional cursor over a merged internal iterator
//!   that applies snapshot filtering and deduplication, so every live
//!   user key shows up exactly once with its newest visible value.
//! - [`TableCache`] - a bounded cache of open [`Table`] handles, keyed
//!   by file number, handing out reference-counted handles that survive
//!   eviction while in use.
//! - [`Arena`] - the bump allocator backing the memtable; it never frees
//!   individual allocations, which is what makes zero-copy reads from
//!   the write buffer safe.
//!
//! # Example usage
//!
//! ```
//! use scree::{BytewiseComparator, DbIter, Memtable, NoopSampler, ValueType};
//!
//! let memtable = Memtable::new();
//! memtable.add(1, ValueType::Value, b"a", b"old");
//! memtable.add(2, ValueType::Value, b"a", b"new");
//! memtable.add(3, ValueType::Deletion, b"b", b"");
//!
//! // A snapshot at sequence number 2 sees exactly one version of "a"
//! let mut iter = DbIter::new(
//!     BytewiseComparator,
//!     Box::new(memtable.iter()),
//!     2,
//!     Box::new(NoopSampler),
//!     0,
//! );
//!
//! iter.seek_to_first();
//! assert!(iter.valid());
//! assert_eq!(b"a", iter.key());
//! assert_eq!(b"new", iter.value());
//!
//! iter.next();
//! assert!(!iter.valid());
//! ```

#![deny(clippy::all, missing_docs, clippy::cargo)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::indexing_slicing)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![warn(clippy::multiple_crate_versions)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::cargo_common_metadata)]

mod arena;
mod checksum;
mod comparator;
mod error;

#[doc(hidden)]
pub mod file;

/// Internal key encoding shared by all read path components
pub mod format;

mod iter;
mod memtable;
mod table;
mod table_cache;

pub use {
    arena::{Arena, BLOCK_SIZE},
    checksum::Checksum,
    comparator::{BytewiseComparator, Comparator},
    error::{Error, Result},
    format::{SeqNo, ValueType, MAX_SEQNO},
    iter::db_iter::{DbIter, NoopSampler, ReadSampler, READ_BYTES_PERIOD},
    iter::merge::MergingIter,
    iter::{BoxedInternalIterator, EmptyIter, InternalIterator},
    memtable::{Memtable, MemtableIter},
    table::{Table, TableBuilder, TableIter},
    table_cache::TableCache,
};
