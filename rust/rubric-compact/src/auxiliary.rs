//! Merging of the tables keyed by document id, and of the tables that only
//! make sense from a single source.
//!
//! Document-keyed tables need no aggregation: once each key's leading
//! document id is shifted by its source's offset, the sources' key ranges are
//! disjoint and the output is the union of the rewritten entries. Tags are
//! copied in their stored form, so compressed tags are never decompressed.

use std::{
    borrow::Cow,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use rubric_common::{Result, error::Error};
use rubric_table::{Table, TableBuilder};

use crate::{DocId, codec};

/// A table to copy and the offset to apply to its document ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxSource {
    pub path: PathBuf,
    pub offset: DocId,
}

impl AuxSource {
    pub fn new(path: impl Into<PathBuf>, offset: DocId) -> AuxSource {
        AuxSource {
            path: path.into(),
            offset,
        }
    }
}

/// Shape of a document-keyed table's keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyLayout {
    /// The key is exactly a sortable document id.
    DocId,
    /// A sortable document id followed by arbitrary bytes (e.g. a term name),
    /// which are preserved.
    DocIdPrefix,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuxMergeStats {
    /// Sources whose entries were copied.
    pub sources_merged: usize,
    /// Sources with data that was discarded.
    pub ignored_sources: Vec<PathBuf>,
    pub entries: u64,
    /// Whether the sources' key ranges overlapped, forcing a sort in memory.
    pub buffered: bool,
}

/// Shifts the leading document id of `key` by `offset`.
///
/// With a zero offset the key is returned unchanged without being decoded.
pub fn rekey<'a>(key: &'a [u8], offset: DocId, layout: KeyLayout) -> Result<Cow<'a, [u8]>> {
    if offset == 0 {
        return Ok(Cow::Borrowed(key));
    }
    let mut input = key;
    let docid: DocId = codec::decode_uint_sortable(&mut input)
        .and_then(|docid| codec::narrow(docid, "docid"))
        .map_err(codec::in_element("document key"))?;
    if layout == KeyLayout::DocId && !input.is_empty() {
        return Err(Error::corrupt(
            "document key",
            format!("{} trailing bytes", input.len()),
        ));
    }
    let docid = docid
        .checked_add(offset)
        .ok_or_else(|| Error::overflow("docid"))?;
    let mut rekeyed = Vec::with_capacity(key.len() + 1);
    codec::encode_uint_sortable(&mut rekeyed, docid as u64);
    rekeyed.extend_from_slice(input);
    Ok(Cow::Owned(rekeyed))
}

/// A source table with entries, and its key range after rekeying.
struct OpenSource {
    table: Table,
    offset: DocId,
    first: Vec<u8>,
    last: Vec<u8>,
}

/// Opens the sources' tables. Absent tables are skipped when `lazy` is set
/// and reported as an error otherwise; tables without entries are skipped.
fn open_sources(sources: &[AuxSource], lazy: bool) -> Result<Vec<(Table, DocId)>> {
    let mut tables = Vec::with_capacity(sources.len());
    for source in sources {
        if lazy && !Table::exists(&source.path) {
            log::debug!("no table at {}", source.path.display());
            continue;
        }
        let table = Table::open(&source.path)?;
        if table.is_empty() {
            continue;
        }
        tables.push((table, source.offset));
    }
    Ok(tables)
}

/// Merges document-keyed tables into `out`.
pub fn merge_docid_tables(
    out: &mut TableBuilder,
    sources: &[AuxSource],
    layout: KeyLayout,
    lazy: bool,
) -> Result<AuxMergeStats> {
    let mut open = Vec::new();
    for (table, offset) in open_sources(sources, lazy)? {
        let (Some(first), Some(last)) = (table.first_key(), table.last_key()?) else {
            continue;
        };
        let first = rekey(first, offset, layout)?.into_owned();
        let last = rekey(&last, offset, layout)?.into_owned();
        open.push(OpenSource {
            table,
            offset,
            first,
            last,
        });
    }
    open.sort_by(|a, b| a.first.cmp(&b.first));

    let mut stats = AuxMergeStats {
        sources_merged: open.len(),
        ..Default::default()
    };
    let disjoint = open.windows(2).all(|pair| pair[0].last < pair[1].first);
    if disjoint {
        for source in &open {
            for entry in source.table.cursor() {
                let entry = entry?;
                let key = rekey(entry.key(), source.offset, layout)?;
                let (stored, compressed) = entry.stored_tag();
                out.add_stored(&key, stored, compressed)?;
                stats.entries += 1;
            }
        }
        return Ok(stats);
    }

    log::debug!(
        "key ranges of {} overlap, sorting entries in memory",
        out.path().display()
    );
    stats.buffered = true;
    let mut entries: BTreeMap<Vec<u8>, (Vec<u8>, bool)> = BTreeMap::new();
    for source in &open {
        for entry in source.table.cursor() {
            let entry = entry?;
            let key = rekey(entry.key(), source.offset, layout)?.into_owned();
            let (stored, compressed) = entry.stored_tag();
            if entries.insert(key, (stored.to_vec(), compressed)).is_some() {
                return Err(Error::corrupt(
                    "document key",
                    format!(
                        "duplicate key after renumbering in {}",
                        source.table.path().display()
                    ),
                ));
            }
        }
    }
    for (key, (stored, compressed)) in &entries {
        out.add_stored(key, stored, *compressed)?;
    }
    stats.entries = entries.len() as u64;
    Ok(stats)
}

/// Copies the first source that has any entries into `out` and ignores the
/// rest, logging a warning for each source whose data is discarded.
pub fn merge_first_source(
    out: &mut TableBuilder,
    sources: &[AuxSource],
    lazy: bool,
) -> Result<AuxMergeStats> {
    let mut stats = AuxMergeStats::default();
    for (table, _) in open_sources(sources, lazy)? {
        if stats.sources_merged > 0 {
            log::warn!(
                "ignoring {} data from {}",
                table_name(out.path()),
                source_dir(table.path())
            );
            stats.ignored_sources.push(table.path().to_path_buf());
            continue;
        }
        for entry in table.cursor() {
            let entry = entry?;
            let (stored, compressed) = entry.stored_tag();
            out.add_stored(entry.key(), stored, compressed)?;
            stats.entries += 1;
        }
        stats.sources_merged = 1;
    }
    Ok(stats)
}

fn table_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn source_dir(path: &Path) -> String {
    path.parent().unwrap_or(path).display().to_string()
}
