//! N-way merge of posting list tables.
//!
//! Each source is read through a [`PostlistCursor`]. A [`MergeQueue`] visits
//! the sources' chunks in ascending `(term, first_docid)` order; the chunks of
//! one term are collected in a [`TermBuffer`] and written out once the next
//! term begins, with the term's statistics summed into the new initial chunk
//! and the continuation flags rewritten so that only the final chunk is
//! marked as last.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    path::{Path, PathBuf},
};

use rubric_common::{Result, error::Error};
use rubric_table::{Table, TableBuilder};

use crate::{
    DocCount, DocId, TermCount,
    chunk::{self, ChunkHeader, MetaInfo},
    cursor::{NormalizedChunk, PostlistCursor},
    postings,
};

/// A posting list table to merge and the offset to apply to its document ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostlistSource {
    pub path: PathBuf,
    pub offset: DocId,
}

impl PostlistSource {
    pub fn new(path: impl Into<PathBuf>, offset: DocId) -> PostlistSource {
        PostlistSource {
            path: path.into(),
            offset,
        }
    }
}

/// Counters of one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostlistMergeStats {
    /// Sources that contributed a metainfo record.
    pub sources_merged: usize,
    /// Sources skipped because their table had no entries at all.
    pub sources_skipped: usize,
    pub terms: u64,
    pub chunks: u64,
    /// Sum of the sources' total document lengths, as written to the output.
    pub total_length: u64,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    term: Vec<u8>,
    first_docid: DocId,
    slot: usize,
}

/// Min-priority queue of source cursors, ordered by the term and first
/// document id of each cursor's current chunk.
///
/// The queue holds only the ordering key and a slot number; the cursors
/// themselves stay in the queue's slot table and are dropped (closing their
/// table) as soon as they run out of chunks.
pub struct MergeQueue {
    heap: BinaryHeap<Reverse<QueueKey>>,
    cursors: Vec<Option<PostlistCursor>>,
}

impl MergeQueue {
    pub fn new() -> MergeQueue {
        MergeQueue {
            heap: BinaryHeap::new(),
            cursors: Vec::new(),
        }
    }

    /// Adds a cursor positioned on its first chunk. A cursor without a
    /// current chunk is dropped.
    pub fn push(&mut self, cursor: PostlistCursor) {
        let slot = self.cursors.len();
        self.cursors.push(Some(cursor));
        self.schedule(slot);
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Removes the smallest chunk from the queue and advances its cursor.
    pub fn pop(&mut self) -> Result<Option<NormalizedChunk>> {
        let Some(Reverse(key)) = self.heap.pop() else {
            return Ok(None);
        };
        let cursor = self.cursors[key.slot]
            .as_mut()
            .ok_or_else(|| Error::invalid_operation("MergeQueue::pop"))?;
        let chunk = cursor
            .take_current()
            .ok_or_else(|| Error::invalid_operation("MergeQueue::pop"))?;
        cursor.advance()?;
        self.schedule(key.slot);
        Ok(Some(chunk))
    }

    fn schedule(&mut self, slot: usize) {
        let key = match &self.cursors[slot] {
            Some(cursor) => cursor.current().map(|chunk| QueueKey {
                term: chunk.term.clone(),
                first_docid: chunk.first_docid,
                slot,
            }),
            None => None,
        };
        match key {
            Some(key) => self.heap.push(Reverse(key)),
            None => self.cursors[slot] = None,
        }
    }
}

impl Default for MergeQueue {
    fn default() -> Self {
        MergeQueue::new()
    }
}

/// The chunks of one term collected from all sources.
#[derive(Debug)]
pub struct TermBuffer {
    term: Vec<u8>,
    tf: DocCount,
    cf: TermCount,
    chunks: Vec<(DocId, Vec<u8>)>,
    /// Last document id of the most recent chunk.
    last_docid: DocId,
}

impl TermBuffer {
    pub fn new(term: Vec<u8>) -> TermBuffer {
        TermBuffer {
            term,
            tf: 0,
            cf: 0,
            chunks: Vec::new(),
            last_docid: 0,
        }
    }

    pub fn term(&self) -> &[u8] {
        &self.term
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Appends a chunk of this buffer's term. Each chunk must start after the
    /// last document id of the chunk before it, and a term must begin with an
    /// initial chunk.
    pub fn push(&mut self, chunk: NormalizedChunk) -> Result<()> {
        if self.chunks.is_empty() {
            if !chunk.initial {
                return Err(Error::corrupt(
                    "postlist table",
                    format!(
                        "continuation chunk at docid {} without an initial chunk for term {:?}",
                        chunk.first_docid,
                        String::from_utf8_lossy(&self.term)
                    ),
                ));
            }
        } else if chunk.first_docid <= self.last_docid {
            return Err(Error::corrupt(
                "postlist table",
                format!(
                    "overlapping chunks for term {:?} at docid {}",
                    String::from_utf8_lossy(&self.term),
                    chunk.first_docid
                ),
            ));
        }
        self.last_docid = postings::chunk_last_docid(chunk.first_docid, &chunk.payload)?;
        self.tf = self
            .tf
            .checked_add(chunk.tf)
            .ok_or_else(|| Error::overflow("term frequency"))?;
        self.cf = self
            .cf
            .checked_add(chunk.cf)
            .ok_or_else(|| Error::overflow("collection frequency"))?;
        self.chunks.push((chunk.first_docid, chunk.payload));
        Ok(())
    }

    /// Writes the buffered chunks as one initial chunk followed by
    /// continuation chunks. Returns the number of chunks written.
    pub fn flush(self, out: &mut TableBuilder) -> Result<usize> {
        let count = self.chunks.len();
        let mut chunks = self.chunks.into_iter();
        let Some((first_docid, payload)) = chunks.next() else {
            return Ok(0);
        };

        let mut tag = Vec::with_capacity(payload.len() + 16);
        ChunkHeader {
            tf: self.tf,
            cf: self.cf,
            first_docid,
        }
        .encode(&mut tag);
        chunk::push_payload(&mut tag, &payload, count == 1);
        out.add(&chunk::initial_chunk_key(&self.term), &tag)?;

        for (i, (first_docid, payload)) in chunks.enumerate() {
            tag.clear();
            chunk::push_payload(&mut tag, &payload, i + 2 == count);
            out.add(
                &chunk::continuation_chunk_key(&self.term, first_docid),
                &tag,
            )?;
        }
        Ok(count)
    }
}

/// Merges the posting lists of `sources` into `out`.
///
/// The output's metainfo record carries `last_docid` and the sum of the
/// sources' total lengths. Sources whose table is empty are skipped.
pub fn merge_postlists(
    out: &mut TableBuilder,
    sources: &[PostlistSource],
    last_docid: DocId,
) -> Result<PostlistMergeStats> {
    let mut stats = PostlistMergeStats::default();
    let mut queue = MergeQueue::new();
    for source in sources {
        let table = Table::open(&source.path)?;
        if table.is_empty() {
            log::debug!("skipping empty postlist {}", source.path.display());
            stats.sources_skipped += 1;
            continue;
        }
        let (mut cursor, meta) = PostlistCursor::open(&table, source.offset)?;
        stats.total_length = stats
            .total_length
            .checked_add(meta.total_length)
            .ok_or_else(|| Error::overflow("total document length"))?;
        stats.sources_merged += 1;
        log::debug!(
            "merging postlist {} ({} entries, offset {})",
            source.path.display(),
            table.entry_count(),
            source.offset
        );
        if cursor.advance()? {
            queue.push(cursor);
        }
    }

    let meta = MetaInfo {
        last_docid,
        total_length: stats.total_length,
    };
    out.add(chunk::METAINFO_KEY, &meta.encode_tag())?;

    let mut buffer: Option<TermBuffer> = None;
    while let Some(chunk) = queue.pop()? {
        let same_term = buffer
            .as_ref()
            .is_some_and(|buffer| buffer.term() == chunk.term.as_slice());
        if !same_term {
            if let Some(done) = buffer.take() {
                stats.chunks += done.flush(out)? as u64;
                stats.terms += 1;
            }
            buffer = Some(TermBuffer::new(chunk.term.clone()));
        }
        if let Some(buffer) = buffer.as_mut() {
            buffer.push(chunk)?;
        }
    }
    if let Some(done) = buffer.take() {
        stats.chunks += done.flush(out)? as u64;
        stats.terms += 1;
    }
    Ok(stats)
}

/// Convenience wrapper that merges `sources` into a new table at `path`,
/// committing it as revision 1.
pub fn merge_postlists_into(
    path: &Path,
    options: rubric_table::TableOptions,
    sources: &[PostlistSource],
    last_docid: DocId,
) -> Result<PostlistMergeStats> {
    let mut out = TableBuilder::create(path, options)?;
    let stats = merge_postlists(&mut out, sources, last_docid)?;
    out.commit(1)?;
    Ok(stats)
}
