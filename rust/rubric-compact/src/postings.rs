//! Posting payloads and the chunk writer used to build posting lists.
//!
//! After the continuation flag a chunk's payload is
//! `[uint last - first][uint wdf]([uint gap - 1][uint wdf])*`, where `first`
//! and `last` are the first and last document ids of the chunk and `gap` is
//! the difference between consecutive document ids. Everything is relative to
//! the chunk's first document id, which lives in the key (continuation chunks)
//! or in the header (initial chunks), so renumbering documents never touches a
//! payload.

use rubric_common::{Result, error::Error, verify_arg};
use rubric_table::TableBuilder;

use crate::{
    DocCount, DocId, TermCount,
    chunk::{self, ChunkHeader, MetaInfo},
    codec::{self, in_element},
};

/// A document that contains a term, with the term's within-document frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Posting {
    pub docid: DocId,
    pub wdf: TermCount,
}

impl Posting {
    pub fn new(docid: DocId, wdf: TermCount) -> Posting {
        Posting { docid, wdf }
    }
}

/// Encodes `postings` (strictly ascending, non-empty) as a payload body
/// without the flag byte.
pub fn encode_postings(buf: &mut Vec<u8>, postings: &[Posting]) {
    let (Some(first), Some(last)) = (postings.first(), postings.last()) else {
        return;
    };
    codec::encode_uint(buf, (last.docid - first.docid) as u64);
    codec::encode_uint(buf, first.wdf);
    for pair in postings.windows(2) {
        codec::encode_uint(buf, (pair[1].docid - pair[0].docid - 1) as u64);
        codec::encode_uint(buf, pair[1].wdf);
    }
}

/// Returns the last document id of a chunk payload (including its flag
/// byte) without decoding its postings.
pub fn chunk_last_docid(first_docid: DocId, payload: &[u8]) -> Result<DocId> {
    chunk::validate_payload(payload)?;
    let mut input = &payload[1..];
    let span = codec::decode_u32(&mut input).map_err(in_element("postlist chunk"))?;
    first_docid
        .checked_add(span)
        .ok_or_else(|| Error::corrupt("postlist chunk", "last docid out of range"))
}

/// Decodes a chunk payload (including its flag byte) whose first document
/// id is `first_docid`.
pub fn decode_payload(first_docid: DocId, payload: &[u8]) -> Result<Vec<Posting>> {
    let last_docid = chunk_last_docid(first_docid, payload)?;
    let element = in_element("postlist chunk");
    let mut input = &payload[1..];
    codec::decode_u32(&mut input).map_err(&element)?;
    let mut postings = vec![Posting::new(
        first_docid,
        codec::decode_uint(&mut input).map_err(&element)?,
    )];
    let mut docid = first_docid;
    while !input.is_empty() {
        let gap = codec::decode_u32(&mut input).map_err(&element)?;
        docid = docid
            .checked_add(gap)
            .and_then(|d| d.checked_add(1))
            .ok_or_else(|| Error::corrupt("postlist chunk", "docid out of range"))?;
        let wdf = codec::decode_uint(&mut input).map_err(&element)?;
        postings.push(Posting::new(docid, wdf));
    }
    if docid != last_docid {
        return Err(Error::corrupt(
            "postlist chunk",
            format!("chunk ends at docid {docid}, header says {last_docid}"),
        ));
    }
    Ok(postings)
}

/// Writes whole posting lists into a postlist table, splitting each list into
/// chunks whose payload stays below a byte limit.
#[derive(Debug, Clone)]
pub struct PostlistChunkWriter {
    max_chunk_bytes: usize,
}

impl Default for PostlistChunkWriter {
    fn default() -> Self {
        PostlistChunkWriter {
            max_chunk_bytes: 2000,
        }
    }
}

impl PostlistChunkWriter {
    pub fn new(max_chunk_bytes: usize) -> PostlistChunkWriter {
        PostlistChunkWriter {
            max_chunk_bytes: max_chunk_bytes.max(8),
        }
    }

    pub fn write_metainfo(&self, out: &mut TableBuilder, meta: &MetaInfo) -> Result<()> {
        out.add(chunk::METAINFO_KEY, &meta.encode_tag())
    }

    /// Writes the posting list of `term`. Postings must be non-empty, start
    /// at docid 1 or above and be strictly ascending by docid. Terms must be
    /// written in ascending order.
    pub fn write_term(
        &self,
        out: &mut TableBuilder,
        term: &[u8],
        postings: &[Posting],
    ) -> Result<()> {
        verify_arg!(postings, !postings.is_empty());
        verify_arg!(postings, postings[0].docid >= 1);
        verify_arg!(
            postings,
            postings.windows(2).all(|p| p[0].docid < p[1].docid)
        );

        let tf: DocCount = postings
            .len()
            .try_into()
            .map_err(|_| Error::overflow("term frequency"))?;
        let cf = postings.iter().try_fold(0u64, |acc, p| {
            acc.checked_add(p.wdf)
                .ok_or_else(|| Error::overflow("collection frequency"))
        })?;

        let chunks = self.split(postings);
        let count = chunks.len();
        for (i, chunk_postings) in chunks.into_iter().enumerate() {
            let last = i + 1 == count;
            let first_docid = chunk_postings[0].docid;
            let mut tag = Vec::new();
            let key = if i == 0 {
                ChunkHeader {
                    tf,
                    cf,
                    first_docid,
                }
                .encode(&mut tag);
                chunk::initial_chunk_key(term)
            } else {
                chunk::continuation_chunk_key(term, first_docid)
            };
            tag.push(if last {
                chunk::LAST_CHUNK
            } else {
                chunk::MORE_CHUNKS
            });
            encode_postings(&mut tag, chunk_postings);
            out.add(&key, &tag)?;
        }
        Ok(())
    }

    fn split<'a>(&self, postings: &'a [Posting]) -> Vec<&'a [Posting]> {
        let mut chunks = Vec::new();
        let mut start = 0;
        let mut size = 0;
        for (i, posting) in postings.iter().enumerate() {
            let gap = if i == start {
                0
            } else {
                posting.docid - postings[i - 1].docid - 1
            };
            let entry = uint_len(gap as u64) + uint_len(posting.wdf);
            if i > start && size + entry > self.max_chunk_bytes {
                chunks.push(&postings[start..i]);
                start = i;
                size = uint_len(posting.wdf);
            } else {
                size += entry;
            }
        }
        chunks.push(&postings[start..]);
        chunks
    }
}

fn uint_len(value: u64) -> usize {
    (64 - value.leading_zeros() as usize).div_ceil(7).max(1)
}
