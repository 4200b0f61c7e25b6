//! Term-by-term reading and checking of a posting list table.

use rubric_common::{Result, error::Error, try_or_ret_some_err};
use rubric_table::{Table, TableCursor};
use serde::Serialize;

use crate::{
    DocCount, DocId, TermCount,
    chunk::{self, ChunkHeader, ChunkKey, MetaInfo},
    postings::{self, Posting},
};

/// The complete posting list of one term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermPostings {
    pub term: Vec<u8>,
    pub tf: DocCount,
    pub cf: TermCount,
    pub postings: Vec<Posting>,
    /// Number of chunks the list is stored in.
    pub chunks: usize,
}

/// Reads a posting list table one term at a time.
///
/// Each term must be stored as an initial chunk followed by continuation
/// chunks of the same term with increasing document ids, only the last of
/// which carries the last-chunk flag. The statistics of the initial chunk
/// must agree with the decoded postings. Any violation is reported as
/// corruption.
pub struct PostlistReader {
    cursor: TableCursor,
    meta: MetaInfo,
    last_term: Option<Vec<u8>>,
}

impl PostlistReader {
    pub fn open(table: &Table) -> Result<PostlistReader> {
        let mut cursor = table.cursor();
        let meta = match cursor.next_entry()? {
            Some(entry) if chunk::is_metainfo_key(entry.key()) => {
                MetaInfo::decode_tag(&entry.read_tag()?)?
            }
            Some(_) => {
                return Err(Error::corrupt(
                    "postlist table",
                    format!("no metainfo record in {}", table.path().display()),
                ));
            }
            None => MetaInfo::default(),
        };
        Ok(PostlistReader {
            cursor,
            meta,
            last_term: None,
        })
    }

    pub fn meta(&self) -> MetaInfo {
        self.meta
    }

    pub fn next_term(&mut self) -> Result<Option<TermPostings>> {
        let Some(entry) = self.cursor.next_entry()? else {
            return Ok(None);
        };
        let (key, tag) = entry.into_key_and_tag()?;
        let term = match ChunkKey::parse(&key)? {
            ChunkKey::Initial { term } => term,
            ChunkKey::Continuation { term, .. } => {
                return Err(Error::corrupt(
                    "postlist table",
                    format!("stray continuation chunk for term {}", display_term(&term)),
                ));
            }
            ChunkKey::MetaInfo => {
                return Err(Error::corrupt("postlist table", "duplicate metainfo record"));
            }
        };
        if self.last_term.as_ref().is_some_and(|last| *last >= term) {
            return Err(Error::corrupt(
                "postlist table",
                format!("term {} out of order", display_term(&term)),
            ));
        }

        let (header, payload) = ChunkHeader::decode(&tag)?;
        let mut list = postings::decode_payload(header.first_docid, payload)?;
        let mut chunks = 1;
        let mut last = chunk::is_last_chunk(payload);
        while !last {
            let Some(entry) = self.cursor.next_entry()? else {
                return Err(self.missing_last_chunk(&term));
            };
            let (key, tag) = entry.into_key_and_tag()?;
            let first_docid = match ChunkKey::parse(&key)? {
                ChunkKey::Continuation {
                    term: chunk_term,
                    first_docid,
                } if chunk_term == term => first_docid,
                _ => return Err(self.missing_last_chunk(&term)),
            };
            if list.last().is_some_and(|p| p.docid >= first_docid) {
                return Err(Error::corrupt(
                    "postlist table",
                    format!(
                        "chunk at docid {first_docid} overlaps its predecessor for term {}",
                        display_term(&term)
                    ),
                ));
            }
            list.extend(postings::decode_payload(first_docid, &tag)?);
            chunks += 1;
            last = chunk::is_last_chunk(&tag);
        }

        let cf = list.iter().map(|p| p.wdf).sum::<TermCount>();
        if header.tf as usize != list.len() || header.cf != cf {
            return Err(Error::corrupt(
                "postlist table",
                format!(
                    "term {} claims tf={} cf={} but has tf={} cf={cf}",
                    display_term(&term),
                    header.tf,
                    header.cf,
                    list.len()
                ),
            ));
        }
        self.last_term = Some(term.clone());
        Ok(Some(TermPostings {
            term,
            tf: header.tf,
            cf: header.cf,
            postings: list,
            chunks,
        }))
    }

    fn missing_last_chunk(&self, term: &[u8]) -> Error {
        Error::corrupt(
            "postlist table",
            format!("term {} has no last chunk", display_term(term)),
        )
    }
}

impl Iterator for PostlistReader {
    type Item = Result<TermPostings>;

    fn next(&mut self) -> Option<Self::Item> {
        let term = try_or_ret_some_err!(self.next_term());
        term.map(Ok)
    }
}

fn display_term(term: &[u8]) -> String {
    format!("{:?}", String::from_utf8_lossy(term))
}

/// Aggregates of a checked posting list table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostlistSummary {
    pub terms: u64,
    pub chunks: u64,
    pub postings: u64,
    pub last_docid: DocId,
    pub total_length: u64,
}

/// Reads the whole table, checking every term's chunk structure and
/// statistics and that no posting exceeds the recorded last document id.
pub fn verify_postlist(table: &Table) -> Result<PostlistSummary> {
    let reader = PostlistReader::open(table)?;
    let meta = reader.meta();
    let mut summary = PostlistSummary {
        last_docid: meta.last_docid,
        total_length: meta.total_length,
        ..Default::default()
    };
    for term in reader {
        let term = term?;
        if let Some(posting) = term.postings.last() {
            if posting.docid > meta.last_docid {
                return Err(Error::corrupt(
                    "postlist table",
                    format!(
                        "docid {} of term {} exceeds last docid {}",
                        posting.docid,
                        display_term(&term.term),
                        meta.last_docid
                    ),
                ));
            }
        }
        summary.terms += 1;
        summary.chunks += term.chunks as u64;
        summary.postings += term.postings.len() as u64;
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use rubric_table::{TableBuilder, TableOptions};

    use super::*;
    use crate::postings::PostlistChunkWriter;

    fn build(path: &Path, entries: &[(Vec<u8>, Vec<u8>)]) -> Table {
        let mut out = TableBuilder::create(path, TableOptions::default()).unwrap();
        out.add(
            chunk::METAINFO_KEY,
            &MetaInfo {
                last_docid: 100,
                total_length: 50,
            }
            .encode_tag(),
        )
        .unwrap();
        for (key, tag) in entries {
            out.add(key, tag).unwrap();
        }
        out.commit(1).unwrap();
        Table::open(path).unwrap()
    }

    fn initial(term: &[u8], tf: DocCount, cf: TermCount, first: DocId, flag: u8, body: &[Posting]) -> (Vec<u8>, Vec<u8>) {
        let mut tag = Vec::new();
        ChunkHeader {
            tf,
            cf,
            first_docid: first,
        }
        .encode(&mut tag);
        tag.push(flag);
        postings::encode_postings(&mut tag, body);
        (chunk::initial_chunk_key(term), tag)
    }

    fn continuation(term: &[u8], flag: u8, body: &[Posting]) -> (Vec<u8>, Vec<u8>) {
        let mut tag = vec![flag];
        postings::encode_postings(&mut tag, body);
        (chunk::continuation_chunk_key(term, body[0].docid), tag)
    }

    fn p(docid: DocId) -> Posting {
        Posting::new(docid, 1)
    }

    #[test]
    fn test_reads_terms() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("postlist.db");
        let mut out = TableBuilder::create(&path, TableOptions::default()).unwrap();
        let writer = PostlistChunkWriter::new(8);
        writer
            .write_metainfo(
                &mut out,
                &MetaInfo {
                    last_docid: 90,
                    total_length: 7,
                },
            )
            .unwrap();
        let list: Vec<_> = (10..90).map(p).collect();
        writer.write_term(&mut out, b"alpha", &list).unwrap();
        writer.write_term(&mut out, b"beta", &[p(3)]).unwrap();
        out.commit(1).unwrap();

        let table = Table::open(&path).unwrap();
        let terms: Vec<_> = PostlistReader::open(&table)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(terms.len(), 2);
        assert_eq!(terms[0].term, b"alpha");
        assert_eq!(terms[0].postings, list);
        assert!(terms[0].chunks > 1);
        assert_eq!(terms[1].tf, 1);

        let summary = verify_postlist(&table).unwrap();
        assert_eq!(summary.terms, 2);
        assert_eq!(summary.postings, 81);
        assert_eq!(summary.total_length, 7);
    }

    #[test]
    fn test_stray_continuation() {
        let dir = tempfile::tempdir().unwrap();
        let table = build(
            &dir.path().join("p.db"),
            &[
                initial(b"a", 1, 1, 1, chunk::LAST_CHUNK, &[p(1)]),
                continuation(b"a", chunk::LAST_CHUNK, &[p(5)]),
            ],
        );
        let err = verify_postlist(&table).unwrap_err();
        assert!(err.to_string().contains("stray continuation"), "{err}");
    }

    #[test]
    fn test_missing_last_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let table = build(
            &dir.path().join("p.db"),
            &[
                initial(b"a", 2, 2, 1, chunk::MORE_CHUNKS, &[p(1)]),
                continuation(b"a", chunk::MORE_CHUNKS, &[p(5)]),
                initial(b"b", 1, 1, 1, chunk::LAST_CHUNK, &[p(1)]),
            ],
        );
        let err = verify_postlist(&table).unwrap_err();
        assert!(err.to_string().contains("no last chunk"), "{err}");
    }

    #[test]
    fn test_wrong_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let table = build(
            &dir.path().join("p.db"),
            &[initial(b"a", 3, 2, 1, chunk::LAST_CHUNK, &[p(1), p(2)])],
        );
        assert!(verify_postlist(&table).unwrap_err().is_corruption());
    }

    #[test]
    fn test_overlapping_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let table = build(
            &dir.path().join("p.db"),
            &[
                initial(b"a", 3, 3, 1, chunk::MORE_CHUNKS, &[p(1), p(6)]),
                continuation(b"a", chunk::LAST_CHUNK, &[p(4)]),
            ],
        );
        let err = verify_postlist(&table).unwrap_err();
        assert!(err.to_string().contains("overlaps"), "{err}");
    }

    #[test]
    fn test_docid_beyond_last_docid() {
        let dir = tempfile::tempdir().unwrap();
        let table = build(
            &dir.path().join("p.db"),
            &[initial(b"a", 1, 1, 101, chunk::LAST_CHUNK, &[p(101)])],
        );
        assert!(verify_postlist(&table).unwrap_err().is_corruption());
    }

    #[test]
    fn test_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.db");
        TableBuilder::create(&path, TableOptions::default())
            .unwrap()
            .commit(1)
            .unwrap();
        let summary = verify_postlist(&Table::open(&path).unwrap()).unwrap();
        assert_eq!(summary, PostlistSummary::default());
    }
}
