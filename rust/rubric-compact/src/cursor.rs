//! Normalizing cursor over one source posting list table.
//!
//! Every chunk is presented in continuation form: the term, the chunk's true
//! first document id (after the source's offset is applied) and the payload
//! starting at the continuation flag. The statistics of an initial chunk are
//! lifted out of its tag into [`NormalizedChunk::tf`] and
//! [`NormalizedChunk::cf`]; continuation chunks report zero for both.

use rubric_common::{Result, error::Error};
use rubric_table::{Table, TableCursor};

use crate::{
    DocCount, DocId, TermCount,
    chunk::{self, ChunkHeader, ChunkKey, MetaInfo},
};

/// One posting list chunk in continuation form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedChunk {
    pub term: Vec<u8>,
    /// Continuation flag followed by the encoded postings.
    pub payload: Vec<u8>,
    pub first_docid: DocId,
    pub tf: DocCount,
    pub cf: TermCount,
    /// Whether the chunk was stored as the term's initial chunk.
    pub initial: bool,
}

pub struct PostlistCursor {
    inner: TableCursor,
    offset: DocId,
    current: Option<NormalizedChunk>,
}

impl PostlistCursor {
    /// Opens a cursor over `table` and reads its metainfo record, which must
    /// be the table's first entry.
    pub fn open(table: &Table, offset: DocId) -> Result<(PostlistCursor, MetaInfo)> {
        let mut inner = table.cursor();
        let meta = match inner.next_entry()? {
            Some(entry) if chunk::is_metainfo_key(entry.key()) => {
                MetaInfo::decode_tag(&entry.read_tag()?)?
            }
            _ => {
                return Err(Error::corrupt(
                    "postlist table",
                    format!("no metainfo record in {}", table.path().display()),
                ));
            }
        };
        let cursor = PostlistCursor {
            inner,
            offset,
            current: None,
        };
        Ok((cursor, meta))
    }

    pub fn offset(&self) -> DocId {
        self.offset
    }

    /// Moves to the next chunk. Returns `false` at the end of the table.
    pub fn advance(&mut self) -> Result<bool> {
        self.current = None;
        let Some(entry) = self.inner.next_entry()? else {
            return Ok(false);
        };
        let (key, tag) = entry.into_key_and_tag()?;
        let normalized = match ChunkKey::parse(&key)? {
            ChunkKey::MetaInfo => {
                return Err(Error::corrupt("postlist table", "duplicate metainfo record"));
            }
            ChunkKey::Initial { term } => {
                let (header, payload) = ChunkHeader::decode(&tag)?;
                chunk::validate_payload(payload)?;
                NormalizedChunk {
                    term,
                    payload: payload.to_vec(),
                    first_docid: header.first_docid,
                    tf: header.tf,
                    cf: header.cf,
                    initial: true,
                }
            }
            ChunkKey::Continuation { term, first_docid } => {
                chunk::validate_payload(&tag)?;
                NormalizedChunk {
                    term,
                    payload: tag,
                    first_docid,
                    tf: 0,
                    cf: 0,
                    initial: false,
                }
            }
        };
        let first_docid = normalized
            .first_docid
            .checked_add(self.offset)
            .ok_or_else(|| Error::overflow("docid"))?;
        self.current = Some(NormalizedChunk {
            first_docid,
            ..normalized
        });
        Ok(true)
    }

    pub fn current(&self) -> Option<&NormalizedChunk> {
        self.current.as_ref()
    }

    pub fn take_current(&mut self) -> Option<NormalizedChunk> {
        self.current.take()
    }
}

#[cfg(test)]
mod tests {
    use rubric_table::{TableBuilder, TableOptions};

    use super::*;
    use crate::postings::{Posting, PostlistChunkWriter};

    fn build(path: &std::path::Path, terms: &[(&[u8], &[DocId])]) {
        let mut out = TableBuilder::create(path, TableOptions::default()).unwrap();
        let writer = PostlistChunkWriter::new(8);
        writer
            .write_metainfo(
                &mut out,
                &MetaInfo {
                    last_docid: 50,
                    total_length: 17,
                },
            )
            .unwrap();
        for (term, docids) in terms {
            let postings: Vec<_> = docids.iter().map(|&d| Posting::new(d, 1)).collect();
            writer.write_term(&mut out, term, &postings).unwrap();
        }
        out.commit(1).unwrap();
    }

    #[test]
    fn test_normalizes_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postlist.db");
        let docids: Vec<DocId> = (2..40).collect();
        build(
            &path,
            &[(&b"cat"[..], docids.as_slice()), (&b"dog"[..], &[5][..])],
        );

        let table = Table::open(&path).unwrap();
        let (mut cursor, meta) = PostlistCursor::open(&table, 100).unwrap();
        assert_eq!(meta.total_length, 17);

        assert!(cursor.advance().unwrap());
        let first = cursor.take_current().unwrap();
        assert_eq!(first.term, b"cat");
        assert_eq!((first.first_docid, first.tf, first.cf), (102, 38, 38));
        assert!(first.initial);
        assert_eq!(first.payload[0], chunk::MORE_CHUNKS);

        let mut last_first_docid = first.first_docid;
        let mut last_flag = first.payload[0];
        loop {
            assert!(cursor.advance().unwrap());
            let chunk = cursor.current().unwrap().clone();
            if chunk.term != b"cat" {
                assert_eq!(chunk.term, b"dog");
                assert_eq!((chunk.first_docid, chunk.tf), (105, 1));
                break;
            }
            assert!(!chunk.initial);
            assert_eq!((chunk.tf, chunk.cf), (0, 0));
            assert!(chunk.first_docid > last_first_docid);
            last_first_docid = chunk.first_docid;
            last_flag = chunk.payload[0];
        }
        assert_eq!(last_flag, chunk::LAST_CHUNK);
        assert!(!cursor.advance().unwrap());
        assert!(cursor.current().is_none());
    }

    #[test]
    fn test_missing_metainfo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postlist.db");
        let mut out = TableBuilder::create(&path, TableOptions::default()).unwrap();
        out.add(&chunk::initial_chunk_key(b"x"), b"\x01\x01\x00\x31\x00\x01")
            .unwrap();
        out.commit(1).unwrap();

        let table = Table::open(&path).unwrap();
        let err = PostlistCursor::open(&table, 0).err().unwrap();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_bad_tag_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postlist.db");
        let mut out = TableBuilder::create(&path, TableOptions::default()).unwrap();
        out.add(chunk::METAINFO_KEY, &MetaInfo::default().encode_tag())
            .unwrap();
        // Header claims a third field that is not there.
        out.add(&chunk::initial_chunk_key(b"x"), b"\x01\x01").unwrap();
        out.commit(1).unwrap();

        let table = Table::open(&path).unwrap();
        let (mut cursor, _) = PostlistCursor::open(&table, 0).unwrap();
        let err = cursor.advance().unwrap_err();
        assert!(err.to_string().contains("postlist tag"), "{err}");
    }

    #[test]
    fn test_offset_overflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postlist.db");
        build(&path, &[(&b"cat"[..], &[10][..])]);
        let table = Table::open(&path).unwrap();
        let (mut cursor, _) = PostlistCursor::open(&table, DocId::MAX - 5).unwrap();
        let err = cursor.advance().unwrap_err();
        assert!(matches!(
            err.kind(),
            rubric_common::error::ErrorKind::Overflow { .. }
        ));
    }
}
