//! Logical views of databases.
//!
//! A [`DatabaseDump`] holds what a database means rather than how it is
//! stored: each term's statistics and postings regardless of chunking, and
//! each auxiliary table's decoded key/tag pairs regardless of blocks and
//! compression. [`expected_merge`] computes the view a compaction of several
//! dumps must produce.

use std::{collections::BTreeMap, path::Path};

use rubric_compact::{
    TableKind, auxiliary, chunk::MetaInfo, kind::MergePolicy, postings::Posting,
    reader::PostlistReader,
};
use rubric_table::Table;

type DocId = u32;

/// Statistics and postings of one term.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermView {
    pub tf: u32,
    pub cf: u64,
    pub postings: Vec<Posting>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseDump {
    pub meta: MetaInfo,
    pub terms: BTreeMap<Vec<u8>, TermView>,
    /// Decoded entries of every table except the posting lists. Absent
    /// tables are empty maps.
    pub tables: BTreeMap<TableKind, BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl DatabaseDump {
    pub fn table(&self, kind: TableKind) -> &BTreeMap<Vec<u8>, Vec<u8>> {
        static EMPTY: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        self.tables.get(&kind).unwrap_or(&EMPTY)
    }

    /// Number of postings over all terms.
    pub fn posting_count(&self) -> usize {
        self.terms.values().map(|t| t.postings.len()).sum()
    }
}

/// Reads the posting lists of a postlist table.
pub fn dump_postlist(
    path: impl AsRef<Path>,
) -> anyhow::Result<(MetaInfo, BTreeMap<Vec<u8>, TermView>)> {
    let table = Table::open(path)?;
    let reader = PostlistReader::open(&table)?;
    let meta = reader.meta();
    let mut terms = BTreeMap::new();
    for term in reader {
        let term = term?;
        terms.insert(
            term.term,
            TermView {
                tf: term.tf,
                cf: term.cf,
                postings: term.postings,
            },
        );
    }
    Ok((meta, terms))
}

/// Reads a table into a key/tag map; a table that does not exist is empty.
pub fn dump_table(path: impl AsRef<Path>) -> anyhow::Result<BTreeMap<Vec<u8>, Vec<u8>>> {
    let path = path.as_ref();
    if !Table::exists(path) {
        return Ok(BTreeMap::new());
    }
    let table = Table::open(path)?;
    let mut entries = BTreeMap::new();
    for entry in table.cursor() {
        let (key, tag) = entry?.into_key_and_tag()?;
        entries.insert(key, tag);
    }
    Ok(entries)
}

pub fn dump_database(dir: impl AsRef<Path>) -> anyhow::Result<DatabaseDump> {
    let dir = dir.as_ref();
    let (meta, terms) = dump_postlist(dir.join(TableKind::Postlist.file_name()))?;
    let mut tables = BTreeMap::new();
    for kind in TableKind::ALL {
        if kind != TableKind::Postlist {
            tables.insert(kind, dump_table(dir.join(kind.file_name()))?);
        }
    }
    Ok(DatabaseDump {
        meta,
        terms,
        tables,
    })
}

/// The view a merge of `sources`, each with its docid offset, must produce.
///
/// Document-keyed tables and postings are shifted and combined; spelling and
/// synonym data come from the first source that has any.
pub fn expected_merge(
    sources: &[(DatabaseDump, DocId)],
    last_docid: DocId,
) -> anyhow::Result<DatabaseDump> {
    let mut merged = DatabaseDump {
        meta: MetaInfo {
            last_docid,
            total_length: 0,
        },
        ..Default::default()
    };
    for (dump, offset) in sources {
        merged.meta.total_length += dump.meta.total_length;
        for (term, view) in &dump.terms {
            let merged_view = merged.terms.entry(term.clone()).or_default();
            merged_view.tf += view.tf;
            merged_view.cf += view.cf;
            merged_view.postings.extend(
                view.postings
                    .iter()
                    .map(|p| Posting::new(p.docid + offset, p.wdf)),
            );
        }
    }
    for view in merged.terms.values_mut() {
        view.postings.sort();
    }

    for kind in TableKind::ALL {
        let layout = match kind.policy() {
            MergePolicy::Postlist => continue,
            MergePolicy::DocIdKeyed(layout) => layout,
            MergePolicy::FirstSourceOnly => {
                let first = sources
                    .iter()
                    .map(|(dump, _)| dump.table(kind))
                    .find(|table| !table.is_empty())
                    .cloned()
                    .unwrap_or_default();
                merged.tables.insert(kind, first);
                continue;
            }
        };
        let mut entries = BTreeMap::new();
        for (dump, offset) in sources {
            for (key, tag) in dump.table(kind) {
                let key = auxiliary::rekey(key, *offset, layout)?.into_owned();
                anyhow::ensure!(
                    entries.insert(key, tag.clone()).is_none(),
                    "duplicate {kind} key after shifting"
                );
            }
        }
        merged.tables.insert(kind, entries);
    }
    Ok(merged)
}

/// Shifts a single dump as a merge of it alone with `offset` would.
pub fn shifted(dump: &DatabaseDump, offset: DocId) -> anyhow::Result<DatabaseDump> {
    let last_docid = dump.meta.last_docid + offset;
    expected_merge(&[(dump.clone(), offset)], last_docid)
}
