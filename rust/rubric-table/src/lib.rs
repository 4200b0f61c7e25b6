//! Immutable, block-structured sorted tables.
//!
//! A table maps byte-string keys to byte-string values ("tags") and is written
//! exactly once, in strictly ascending key order, by a [`TableBuilder`]. Once
//! committed it is opened read-only as a [`Table`] and scanned with a
//! [`TableCursor`].
//!
//! # File Layout
//!
//! ```text
//! +--------------------+  offset 0
//! | data block 0       |  [u32 payload_len][entries...][u32 checksum][padding]
//! | data block 1       |
//! | ...                |
//! +--------------------+  index_offset
//! | block index        |  [u32 count]([u32 len][first_key][u64 offset][u32 length][u32 entries])*
//! |                    |  [u32 checksum]
//! +--------------------+  file_size - 48
//! | footer             |  magic, version, block size, revision, compression,
//! |                    |  entry count, index offset, index length, checksum
//! +--------------------+
//! ```
//!
//! Every block occupies a whole multiple of the configured block size. An entry
//! is `[u32 key_len][key][u8 flags][u32 tag_len][tag]`; the low bit of `flags`
//! marks a zstd-compressed tag. Decompression is transparent to
//! [`TableEntry::read_tag`], while [`TableEntry::stored_tag`] exposes the stored
//! form so that a copy into another table can skip recompression.
//!
//! # Commit
//!
//! The builder writes to `<path>.tmp` and renames it over `<path>` on
//! [`TableBuilder::commit`], so readers never observe a partially written table.

mod builder;
mod checksum;
mod file;
mod format;
mod options;
mod reader;

pub use builder::{TableBuilder, TableSummary};
pub use options::{CompressionStrategy, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, TableOptions};
pub use reader::{Table, TableCursor, TableEntry};

/// Removes a committed table file, ignoring a file that does not exist.
pub fn remove_table(path: impl AsRef<std::path::Path>) -> rubric_common::Result<()> {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(rubric_common::error::Error::io(path.display().to_string(), e)),
    }
}
