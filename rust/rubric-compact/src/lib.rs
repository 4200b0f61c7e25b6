//! Compaction and merging of Rubric databases.
//!
//! A Rubric database is a directory of sorted tables (see [`TableKind`]). This
//! crate combines one or more source databases into a single new database,
//! renumbering document ids so that the documents of different sources never
//! collide, and rebuilding every table with tighter block packing.
//!
//! The posting list table requires a real N-way merge: each term's postings
//! are split into chunks, the first of which carries the term's statistics,
//! and chunks from different sources must be interleaved by starting document
//! id ([`merge`]). The remaining tables are keyed by document id and are merged
//! by copying with rewritten keys ([`auxiliary`]). When many sources are
//! merged, the posting lists can be combined in several bounded-fan-in rounds
//! through temporary tables ([`multipass`]).
//!
//! [`Compactor`] drives the whole process for a set of database directories.

pub mod auxiliary;
pub mod chunk;
pub mod codec;
pub mod compactor;
pub mod config;
pub mod cursor;
pub mod kind;
pub mod merge;
pub mod multipass;
pub mod postings;
pub mod reader;
pub mod source;

pub use compactor::{CompactionReport, Compactor, SourceReport, TableStats};
pub use config::{Compaction, CompactorOptions, OffsetStrategy, parse_block_size};
pub use kind::TableKind;
pub use source::{MARKER_FILE, SourceDatabase, assign_offsets};

/// Document identifier. Valid ids start at 1.
pub type DocId = u32;

/// Number of documents containing a term.
pub type DocCount = u32;

/// Number of occurrences of a term, within one document or across a collection.
pub type TermCount = u64;
