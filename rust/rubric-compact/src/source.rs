use std::path::{Path, PathBuf};

use rubric_common::{Result, error::Error};
use rubric_table::Table;

use crate::{
    DocId,
    chunk::{self, MetaInfo},
    codec,
    config::OffsetStrategy,
    kind::TableKind,
};

/// Name of the file that marks a directory as a Rubric database.
pub const MARKER_FILE: &str = "iamrubric";

/// An opened source database: its location and the document id range it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDatabase {
    path: PathBuf,
    meta: MetaInfo,
    doc_count: u64,
    first_docid: Option<DocId>,
}

impl SourceDatabase {
    /// Returns `true` if `dir` carries the database marker file.
    pub fn is_database(dir: impl AsRef<Path>) -> bool {
        dir.as_ref().join(MARKER_FILE).is_file()
    }

    /// Opens the database in `dir`, reading its document id range from the
    /// posting list metainfo and the record table.
    pub fn open(dir: impl AsRef<Path>) -> Result<SourceDatabase> {
        let path = dir.as_ref().to_path_buf();
        if !SourceDatabase::is_database(&path) {
            return Err(Error::invalid_arg(
                "source",
                format!("'{}' is not a rubric database directory", path.display()),
            ));
        }

        let postlist = Table::open(path.join(TableKind::Postlist.file_name()))?;
        let meta = match postlist.cursor().next_entry()? {
            Some(entry) if chunk::is_metainfo_key(entry.key()) => {
                MetaInfo::decode_tag(&entry.read_tag()?)?
            }
            Some(_) => {
                return Err(Error::corrupt(
                    "postlist table",
                    format!("no metainfo record in {}", postlist.path().display()),
                ));
            }
            None => MetaInfo::default(),
        };

        let record = Table::open(path.join(TableKind::Record.file_name()))?;
        let first_docid = match record.first_key() {
            Some(key) => {
                let mut input = key;
                let docid = codec::decode_uint_sortable(&mut input)
                    .and_then(|docid| codec::narrow(docid, "docid"))
                    .map_err(codec::in_element("record key"))?;
                Some(docid)
            }
            None => None,
        };

        Ok(SourceDatabase {
            path,
            meta,
            doc_count: record.entry_count(),
            first_docid,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn table_path(&self, kind: TableKind) -> PathBuf {
        self.path.join(kind.file_name())
    }

    pub fn doc_count(&self) -> u64 {
        self.doc_count
    }

    /// Highest document id the database has used.
    pub fn last_docid(&self) -> DocId {
        self.meta.last_docid
    }

    /// Lowest document id in use, if there are any documents.
    pub fn first_docid(&self) -> Option<DocId> {
        self.first_docid
    }

    /// Sum of the lengths of the database's documents.
    pub fn total_length(&self) -> u64 {
        self.meta.total_length
    }
}

/// Computes the document id offset of each source and the last document id
/// of the merged database.
///
/// Sources are laid out one after another in the order given. A source
/// without documents gets the running total as its offset and still advances
/// the total by its last document id.
pub fn assign_offsets(
    sources: &[SourceDatabase],
    strategy: OffsetStrategy,
) -> Result<(Vec<DocId>, DocId)> {
    let mut offsets = Vec::with_capacity(sources.len());
    let mut total: DocId = 0;
    for source in sources {
        let offset = match (strategy, source.first_docid()) {
            (OffsetStrategy::ReclaimLeading, Some(first)) if source.doc_count() > 0 => {
                total.saturating_sub(first.saturating_sub(1))
            }
            _ => total,
        };
        total = offset
            .checked_add(source.last_docid())
            .ok_or_else(|| Error::overflow("docid offset"))?;
        log::debug!(
            "source {}: {} documents, offset {offset}",
            source.path().display(),
            source.doc_count()
        );
        offsets.push(offset);
    }
    Ok((offsets, total))
}
