//! The tables of a database and how each one is merged.

use std::path::{Path, PathBuf};

use rubric_common::Result;
use rubric_table::{CompressionStrategy, TableBuilder};
use serde::{Deserialize, Serialize};

use crate::{
    DocId,
    auxiliary::{self, AuxSource, KeyLayout},
    config::CompactorOptions,
    merge::{self, PostlistSource},
    multipass,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    /// Posting lists, keyed by term.
    Postlist,
    /// Document data, keyed by docid.
    Record,
    /// Per-document term lists, keyed by docid.
    Termlist,
    /// Positional information, keyed by docid and term.
    Position,
    /// Document values, keyed by docid.
    Value,
    /// Spelling correction data.
    Spelling,
    /// Synonym data.
    Synonym,
}

/// How a table's sources are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// N-way merge of posting list chunks.
    Postlist,
    /// Copy of every source with renumbered document keys.
    DocIdKeyed(KeyLayout),
    /// Copy of the first source holding data; the others are ignored.
    FirstSourceOnly,
}

struct KindInfo {
    name: &'static str,
    compression: CompressionStrategy,
    lazy: bool,
    policy: MergePolicy,
}

const fn kind_info(
    name: &'static str,
    compression: CompressionStrategy,
    lazy: bool,
    policy: MergePolicy,
) -> KindInfo {
    KindInfo {
        name,
        compression,
        lazy,
        policy,
    }
}

impl TableKind {
    /// All tables, in the order they are merged.
    pub const ALL: [TableKind; 7] = [
        TableKind::Postlist,
        TableKind::Record,
        TableKind::Termlist,
        TableKind::Position,
        TableKind::Value,
        TableKind::Spelling,
        TableKind::Synonym,
    ];

    fn info(self) -> KindInfo {
        use CompressionStrategy::{None as Plain, Zstd};
        use MergePolicy::*;
        match self {
            TableKind::Postlist => kind_info("postlist", Plain, false, Postlist),
            TableKind::Record => kind_info("record", Zstd, false, DocIdKeyed(KeyLayout::DocId)),
            TableKind::Termlist => kind_info("termlist", Zstd, false, DocIdKeyed(KeyLayout::DocId)),
            TableKind::Position => {
                kind_info("position", Plain, true, DocIdKeyed(KeyLayout::DocIdPrefix))
            }
            TableKind::Value => kind_info("value", Plain, true, DocIdKeyed(KeyLayout::DocId)),
            TableKind::Spelling => kind_info("spelling", Zstd, true, FirstSourceOnly),
            TableKind::Synonym => kind_info("synonym", Zstd, true, FirstSourceOnly),
        }
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// File name of the table inside a database directory.
    pub fn file_name(self) -> String {
        format!("{}.db", self.name())
    }

    pub fn compression(self) -> CompressionStrategy {
        self.info().compression
    }

    /// Whether the table is only created when it has entries.
    pub fn is_lazy(self) -> bool {
        self.info().lazy
    }

    pub fn policy(self) -> MergePolicy {
        self.info().policy
    }

    pub fn merger(self) -> &'static dyn TableMerger {
        static POSTLIST: PostlistMerger = PostlistMerger;
        static DOCID: DocIdTableMerger = DocIdTableMerger {
            layout: KeyLayout::DocId,
        };
        static DOCID_PREFIX: DocIdTableMerger = DocIdTableMerger {
            layout: KeyLayout::DocIdPrefix,
        };
        static FIRST_SOURCE: FirstSourceMerger = FirstSourceMerger;
        match self.policy() {
            MergePolicy::Postlist => &POSTLIST,
            MergePolicy::DocIdKeyed(KeyLayout::DocId) => &DOCID,
            MergePolicy::DocIdKeyed(KeyLayout::DocIdPrefix) => &DOCID_PREFIX,
            MergePolicy::FirstSourceOnly => &FIRST_SOURCE,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything a [`TableMerger`] needs to know about one table's merge.
pub struct MergeContext<'a> {
    pub kind: TableKind,
    /// Source database directories and their document id offsets.
    pub sources: &'a [(PathBuf, DocId)],
    /// Destination database directory, also used for temporary tables.
    pub destination: &'a Path,
    pub options: &'a CompactorOptions,
    /// Highest document id of the merged database.
    pub last_docid: DocId,
}

impl MergeContext<'_> {
    /// Path of this context's table in each source, with its offset.
    pub fn source_tables(&self) -> impl Iterator<Item = (PathBuf, DocId)> + '_ {
        let file_name = self.kind.file_name();
        self.sources
            .iter()
            .map(move |(dir, offset)| (dir.join(&file_name), *offset))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Source tables whose data was discarded.
    pub ignored_sources: Vec<PathBuf>,
    /// Intermediate posting list rounds.
    pub multipass_rounds: usize,
}

/// Merges one table of every source into the output table.
pub trait TableMerger: Sync {
    fn merge(&self, ctx: &MergeContext<'_>, out: &mut TableBuilder) -> Result<MergeOutcome>;
}

pub struct PostlistMerger;

impl TableMerger for PostlistMerger {
    fn merge(&self, ctx: &MergeContext<'_>, out: &mut TableBuilder) -> Result<MergeOutcome> {
        let sources: Vec<_> = ctx
            .source_tables()
            .map(|(path, offset)| PostlistSource::new(path, offset))
            .collect();
        if !ctx.options.multipass {
            merge::merge_postlists(out, &sources, ctx.last_docid)?;
            return Ok(MergeOutcome::default());
        }
        let stats = multipass::merge_multipass(
            out,
            &sources,
            ctx.last_docid,
            ctx.options.fan_in,
            ctx.destination,
            &ctx.options.temp_table_options(),
        )?;
        Ok(MergeOutcome {
            multipass_rounds: stats.rounds,
            ..Default::default()
        })
    }
}

pub struct DocIdTableMerger {
    layout: KeyLayout,
}

impl TableMerger for DocIdTableMerger {
    fn merge(&self, ctx: &MergeContext<'_>, out: &mut TableBuilder) -> Result<MergeOutcome> {
        let sources: Vec<_> = ctx
            .source_tables()
            .map(|(path, offset)| AuxSource::new(path, offset))
            .collect();
        auxiliary::merge_docid_tables(out, &sources, self.layout, ctx.kind.is_lazy())?;
        Ok(MergeOutcome::default())
    }
}

pub struct FirstSourceMerger;

impl TableMerger for FirstSourceMerger {
    fn merge(&self, ctx: &MergeContext<'_>, out: &mut TableBuilder) -> Result<MergeOutcome> {
        let sources: Vec<_> = ctx
            .source_tables()
            .map(|(path, offset)| AuxSource::new(path, offset))
            .collect();
        let stats = auxiliary::merge_first_source(out, &sources, ctx.kind.is_lazy())?;
        Ok(MergeOutcome {
            ignored_sources: stats.ignored_sources,
            ..Default::default()
        })
    }
}
