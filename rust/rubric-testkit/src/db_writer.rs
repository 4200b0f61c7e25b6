//! Construction of source databases for tests.
//!
//! A [`DatabaseWriter`] collects documents and auxiliary entries in memory and
//! writes a database directory with every table the compactor reads: the
//! posting lists (split into chunks by [`PostlistChunkWriter`]), the record,
//! termlist and value tables keyed by docid, the position table keyed by docid
//! and term, and optionally the spelling and synonym tables.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use rubric_compact::{
    CompactorOptions, MARKER_FILE, TableKind,
    chunk::MetaInfo,
    codec,
    postings::{Posting, PostlistChunkWriter},
};
use rubric_table::TableBuilder;

type DocId = u32;

/// Marker file contents written by default.
pub const DEFAULT_MARKER: &[u8] = b"rubric 1\n";

/// One document: its data, terms with their wdf, optional positions and an
/// optional value slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub docid: DocId,
    pub data: Vec<u8>,
    pub terms: BTreeMap<Vec<u8>, u64>,
    pub positions: BTreeMap<Vec<u8>, Vec<u32>>,
    pub value: Option<Vec<u8>>,
}

impl Document {
    pub fn new(docid: DocId) -> Document {
        Document {
            docid,
            data: format!("document {docid}").into_bytes(),
            ..Default::default()
        }
    }

    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Document {
        self.data = data.into();
        self
    }

    /// Adds `wdf` occurrences of `term`.
    pub fn with_term(mut self, term: impl Into<Vec<u8>>, wdf: u64) -> Document {
        *self.terms.entry(term.into()).or_default() += wdf;
        self
    }

    /// Adds `term` at the given positions; its wdf grows by their count.
    pub fn with_positions(mut self, term: impl Into<Vec<u8>>, positions: &[u32]) -> Document {
        let term = term.into();
        *self.terms.entry(term.clone()).or_default() += positions.len() as u64;
        self.positions
            .entry(term)
            .or_default()
            .extend_from_slice(positions);
        self
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Document {
        self.value = Some(value.into());
        self
    }

    /// Document length: the sum of its terms' wdf.
    pub fn length(&self) -> u64 {
        self.terms.values().sum()
    }
}

/// Docid key of the record, termlist and value tables.
pub fn docid_key(docid: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    codec::encode_uint_sortable(&mut key, docid as u64);
    key
}

/// Key of the position table: the docid key followed by the raw term.
pub fn position_key(docid: DocId, term: &[u8]) -> Vec<u8> {
    let mut key = docid_key(docid);
    key.extend_from_slice(term);
    key
}

/// Termlist tag of a document: `([uint len][term][uint wdf])*`.
pub fn termlist_tag(doc: &Document) -> Vec<u8> {
    let mut tag = Vec::new();
    for (term, wdf) in &doc.terms {
        codec::encode_uint(&mut tag, term.len() as u64);
        tag.extend_from_slice(term);
        codec::encode_uint(&mut tag, *wdf);
    }
    tag
}

/// Position tag of one term in one document: the positions as uints.
pub fn positions_tag(positions: &[u32]) -> Vec<u8> {
    let mut tag = Vec::new();
    for &pos in positions {
        codec::encode_uint(&mut tag, pos as u64);
    }
    tag
}

/// Builds a database directory.
#[derive(Debug, Clone)]
pub struct DatabaseWriter {
    documents: BTreeMap<DocId, Document>,
    last_docid: Option<DocId>,
    spelling: BTreeMap<Vec<u8>, Vec<u8>>,
    synonym: BTreeMap<Vec<u8>, Vec<u8>>,
    chunk_bytes: usize,
    block_size: u32,
    marker: Vec<u8>,
}

impl Default for DatabaseWriter {
    fn default() -> Self {
        DatabaseWriter {
            documents: BTreeMap::new(),
            last_docid: None,
            spelling: BTreeMap::new(),
            synonym: BTreeMap::new(),
            chunk_bytes: 2000,
            block_size: 8192,
            marker: DEFAULT_MARKER.to_vec(),
        }
    }
}

impl DatabaseWriter {
    pub fn new() -> DatabaseWriter {
        Default::default()
    }

    /// Adds a document, replacing any earlier document with the same docid.
    pub fn add_document(&mut self, doc: Document) -> &mut Self {
        assert!(doc.docid >= 1, "docids start at 1");
        self.documents.insert(doc.docid, doc);
        self
    }

    /// Declares the highest docid the database has used, which may exceed
    /// the largest docid of its documents.
    pub fn set_last_docid(&mut self, last_docid: DocId) -> &mut Self {
        self.last_docid = Some(last_docid);
        self
    }

    pub fn add_spelling(
        &mut self,
        key: impl Into<Vec<u8>>,
        tag: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.spelling.insert(key.into(), tag.into());
        self
    }

    pub fn add_synonym(
        &mut self,
        key: impl Into<Vec<u8>>,
        tag: impl Into<Vec<u8>>,
    ) -> &mut Self {
        self.synonym.insert(key.into(), tag.into());
        self
    }

    /// Sets the payload size at which posting lists are split into chunks.
    pub fn set_chunk_bytes(&mut self, chunk_bytes: usize) -> &mut Self {
        self.chunk_bytes = chunk_bytes;
        self
    }

    pub fn set_block_size(&mut self, block_size: u32) -> &mut Self {
        self.block_size = block_size;
        self
    }

    pub fn set_marker(&mut self, marker: impl Into<Vec<u8>>) -> &mut Self {
        self.marker = marker.into();
        self
    }

    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn doc_count(&self) -> usize {
        self.documents.len()
    }

    pub fn last_docid(&self) -> DocId {
        let max = self.documents.keys().next_back().copied().unwrap_or(0);
        self.last_docid.unwrap_or(0).max(max)
    }

    pub fn total_length(&self) -> u64 {
        self.documents.values().map(Document::length).sum()
    }

    /// Posting lists of all terms, by term.
    pub fn postings(&self) -> BTreeMap<Vec<u8>, Vec<Posting>> {
        let mut lists: BTreeMap<Vec<u8>, Vec<Posting>> = BTreeMap::new();
        for doc in self.documents.values() {
            for (term, &wdf) in &doc.terms {
                lists
                    .entry(term.clone())
                    .or_default()
                    .push(Posting::new(doc.docid, wdf));
            }
        }
        lists
    }

    /// Writes the database into `dir`, creating the directory if needed.
    pub fn write(&self, dir: impl AsRef<Path>) -> anyhow::Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let options = CompactorOptions {
            block_size: self.block_size,
            ..Default::default()
        };
        let builder = |kind: TableKind| {
            TableBuilder::create(dir.join(kind.file_name()), options.table_options(kind))
        };

        let mut postlist = builder(TableKind::Postlist)?;
        let writer = PostlistChunkWriter::new(self.chunk_bytes);
        writer.write_metainfo(
            &mut postlist,
            &MetaInfo {
                last_docid: self.last_docid(),
                total_length: self.total_length(),
            },
        )?;
        // Terms are ordered by their chunk keys, which sort like the raw terms.
        for (term, postings) in self.postings() {
            writer.write_term(&mut postlist, &term, &postings)?;
        }
        postlist.commit(1)?;

        let mut record = builder(TableKind::Record)?;
        let mut termlist = builder(TableKind::Termlist)?;
        let mut position = builder(TableKind::Position)?;
        let mut value = builder(TableKind::Value)?;
        for doc in self.documents.values() {
            let key = docid_key(doc.docid);
            record.add(&key, &doc.data)?;
            termlist.add(&key, &termlist_tag(doc))?;
            for (term, positions) in &doc.positions {
                position.add(&position_key(doc.docid, term), &positions_tag(positions))?;
            }
            if let Some(v) = &doc.value {
                value.add(&key, v)?;
            }
        }
        record.commit(1)?;
        termlist.commit(1)?;
        position.commit(1)?;
        value.commit(1)?;

        for (kind, entries) in [
            (TableKind::Spelling, &self.spelling),
            (TableKind::Synonym, &self.synonym),
        ] {
            let mut out = builder(kind)?;
            for (key, tag) in entries {
                out.add(key, tag)?;
            }
            out.commit(1)?;
        }

        std::fs::write(dir.join(MARKER_FILE), &self.marker)?;
        Ok(dir.to_path_buf())
    }
}
