// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::fs::File;
use std::path::{Path, PathBuf};

/// Magic bytes stored in every table file footer
pub const MAGIC_BYTES: [u8; 4] = [b'S', b'C', b'R', 1];

/// Primary file name extension of table files
pub const TABLE_FILE_EXT: &str = "tbl";

/// File name extension used by earlier versions of the engine
///
/// Consulted as a fallback when the primary name does not open.
pub const LEGACY_TABLE_FILE_EXT: &str = "sst";

/// Returns the primary path of the table file with the given number.
#[must_use]
pub fn table_file_path(folder: &Path, file_number: u64) -> PathBuf {
    folder.join(format!("{file_number:06}.{TABLE_FILE_EXT}"))
}

/// Returns the legacy path of the table file with the given number.
#[must_use]
pub fn legacy_table_file_path(folder: &Path, file_number: u64) -> PathBuf {
    folder.join(format!("{file_number:06}.{LEGACY_TABLE_FILE_EXT}"))
}

/// Reads exactly `size` bytes at `offset` using `pread`.
pub fn read_exact_at(file: &File, offset: u64, size: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0; size];

    {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            file.read_exact_at(&mut buf, offset)?;
        }

        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;

            let mut pos = 0;
            while pos < buf.len() {
                #[allow(clippy::indexing_slicing)]
                let read = file.seek_read(&mut buf[pos..], offset + pos as u64)?;
                if read == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "failed to fill whole buffer",
                    ));
                }
                pos += read;
            }
        }
    }

    Ok(buf)
}
