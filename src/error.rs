// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::Checksum;
use std::sync::Arc;

/// Represents errors that can occur in the read path
///
/// I/O errors are wrapped in an [`Arc`] so the error stays cloneable;
/// iterators report a sticky status that may be observed more than once.
#[derive(Debug, Clone)]
pub enum Error {
    /// I/O error
    Io(Arc<std::io::Error>),

    /// Data could not be parsed
    Corruption(&'static str),

    /// Invalid checksum value (got, expected)
    ChecksumMismatch {
        /// The checksum computed from the read bytes
        got: Checksum,

        /// The checksum stored alongside the data
        expected: Checksum,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScreeError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

/// Read path result
pub type Result<T> = std::result::Result<T, Error>;
