//! Key and tag layout of the posting list table.
//!
//! ```text
//! metainfo      key: 00
//!               tag: [uint last_docid][uint_last total_length]
//! initial chunk key: sortable(term)
//!               tag: [uint tf][uint cf][uint first_docid - 1][flag][postings]
//! continuation  key: sortable(term) sortable_uint(first_docid)
//!               tag: [flag][postings]
//! ```
//!
//! `flag` is [`LAST_CHUNK`] on the final chunk of a term and [`MORE_CHUNKS`]
//! everywhere else.

use rubric_common::{Result, error::Error, verify_data};

use crate::{
    DocCount, DocId, TermCount,
    codec::{self, in_element},
};

/// Key of the single metainfo record.
pub const METAINFO_KEY: &[u8] = &[0];

/// Continuation flag of a term's final chunk.
pub const LAST_CHUNK: u8 = b'1';

/// Continuation flag of every chunk that is followed by another.
pub const MORE_CHUNKS: u8 = b'0';

pub fn is_metainfo_key(key: &[u8]) -> bool {
    key == METAINFO_KEY
}

/// Collection-wide aggregates stored in the metainfo record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetaInfo {
    /// Highest document id used.
    pub last_docid: DocId,
    /// Sum of all document lengths.
    pub total_length: u64,
}

impl MetaInfo {
    pub fn encode_tag(&self) -> Vec<u8> {
        let mut tag = Vec::with_capacity(16);
        codec::encode_uint(&mut tag, self.last_docid as u64);
        codec::encode_uint_last(&mut tag, self.total_length);
        tag
    }

    pub fn decode_tag(tag: &[u8]) -> Result<MetaInfo> {
        let element = in_element("metainfo tag");
        let mut input = tag;
        let last_docid = codec::decode_u32(&mut input).map_err(&element)?;
        let total_length = codec::decode_uint_last(&mut input).map_err(&element)?;
        Ok(MetaInfo {
            last_docid,
            total_length,
        })
    }
}

/// A decoded posting list key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkKey {
    MetaInfo,
    Initial { term: Vec<u8> },
    Continuation { term: Vec<u8>, first_docid: DocId },
}

impl ChunkKey {
    pub fn parse(key: &[u8]) -> Result<ChunkKey> {
        if is_metainfo_key(key) {
            return Ok(ChunkKey::MetaInfo);
        }
        let element = in_element("postlist key");
        let mut input = key;
        let term = codec::decode_string_sortable(&mut input).map_err(&element)?;
        if input.is_empty() {
            return Ok(ChunkKey::Initial { term });
        }
        let first_docid = codec::decode_uint_sortable(&mut input)
            .and_then(|docid| codec::narrow(docid, "docid"))
            .map_err(&element)?;
        if !input.is_empty() {
            return Err(Error::corrupt(
                "postlist key",
                format!("{} trailing bytes", input.len()),
            ));
        }
        Ok(ChunkKey::Continuation { term, first_docid })
    }

    pub fn term(&self) -> Option<&[u8]> {
        match self {
            ChunkKey::MetaInfo => None,
            ChunkKey::Initial { term } | ChunkKey::Continuation { term, .. } => Some(term),
        }
    }
}

pub fn initial_chunk_key(term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 2);
    codec::encode_string_sortable(&mut key, term);
    key
}

pub fn continuation_chunk_key(term: &[u8], first_docid: DocId) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 7);
    codec::encode_string_sortable(&mut key, term);
    codec::encode_uint_sortable(&mut key, first_docid as u64);
    key
}

/// Statistics at the head of a term's initial chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub tf: DocCount,
    pub cf: TermCount,
    /// Lowest document id of the whole posting list.
    pub first_docid: DocId,
}

impl ChunkHeader {
    /// Decodes the header at the start of an initial chunk's tag and returns
    /// it with the remaining bytes (flag and postings).
    pub fn decode(tag: &[u8]) -> Result<(ChunkHeader, &[u8])> {
        let element = in_element("postlist tag");
        let mut input = tag;
        let tf = codec::decode_u32(&mut input).map_err(&element)?;
        let cf = codec::decode_uint(&mut input).map_err(&element)?;
        let first_docid_minus_1 = codec::decode_u32(&mut input).map_err(&element)?;
        let first_docid = first_docid_minus_1
            .checked_add(1)
            .ok_or_else(|| Error::corrupt("postlist tag", "first docid out of range"))?;
        Ok((
            ChunkHeader {
                tf,
                cf,
                first_docid,
            },
            input,
        ))
    }

    /// Appends the encoded header. `first_docid` must be at least 1.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        codec::encode_uint(buf, self.tf as u64);
        codec::encode_uint(buf, self.cf);
        codec::encode_uint(buf, self.first_docid.saturating_sub(1) as u64);
    }
}

/// Checks that `payload` starts with a valid continuation flag.
pub fn validate_payload(payload: &[u8]) -> Result<()> {
    verify_data!(
        postlist_tag,
        matches!(payload.first(), Some(&LAST_CHUNK) | Some(&MORE_CHUNKS))
    );
    Ok(())
}

/// Returns `true` if the payload's flag marks the last chunk of a term.
pub fn is_last_chunk(payload: &[u8]) -> bool {
    payload.first() == Some(&LAST_CHUNK)
}

/// Appends `payload` with its flag byte replaced according to `last`.
///
/// `payload` must be non-empty (see [`validate_payload`]).
pub fn push_payload(buf: &mut Vec<u8>, payload: &[u8], last: bool) {
    buf.push(if last { LAST_CHUNK } else { MORE_CHUNKS });
    buf.extend_from_slice(payload.get(1..).unwrap_or_default());
}
