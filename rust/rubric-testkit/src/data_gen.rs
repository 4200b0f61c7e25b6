//! Deterministic synthetic collections.
//!
//! Every generator takes a seed, so a failing test can be reproduced exactly.

use crate::db_writer::{DatabaseWriter, Document};

/// Shape of a generated collection.
#[derive(Debug, Clone)]
pub struct CollectionShape {
    pub documents: usize,
    /// Number of distinct terms to draw from.
    pub vocabulary: usize,
    pub max_terms_per_doc: usize,
    pub max_wdf: u64,
    /// Largest gap between consecutive docids; `1` gives dense docids.
    pub max_docid_gap: u32,
    /// Largest docid of the first document.
    pub max_first_docid: u32,
    /// Unused docids declared after the last document.
    pub trailing_docids: u32,
    /// Share of documents that carry positions and a value, in percent.
    pub positional_percent: u8,
    pub spelling_entries: usize,
    /// Payload size at which posting lists are split.
    pub chunk_bytes: usize,
}

impl Default for CollectionShape {
    fn default() -> Self {
        CollectionShape {
            documents: 200,
            vocabulary: 60,
            max_terms_per_doc: 12,
            max_wdf: 5,
            max_docid_gap: 3,
            max_first_docid: 5,
            trailing_docids: 2,
            positional_percent: 30,
            spelling_entries: 0,
            chunk_bytes: 64,
        }
    }
}

/// The `n`-th vocabulary term. Every seventh term contains a zero byte so
/// that key escaping is exercised.
pub fn term(n: usize) -> Vec<u8> {
    if n % 7 == 3 {
        format!("z\0{n:04}").into_bytes()
    } else {
        format!("t{n:04}").into_bytes()
    }
}

/// Generates one collection.
pub fn generate_collection(seed: u64, shape: &CollectionShape) -> DatabaseWriter {
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut db = DatabaseWriter::new();
    db.set_chunk_bytes(shape.chunk_bytes);

    let mut docid = rng.u32(1..=shape.max_first_docid.max(1));
    for i in 0..shape.documents {
        if i > 0 {
            docid += rng.u32(1..=shape.max_docid_gap.max(1));
        }
        let mut doc = Document::new(docid);
        let positional = rng.u8(0..100) < shape.positional_percent;
        for _ in 0..rng.usize(1..=shape.max_terms_per_doc.max(1)) {
            // Skewed towards low term numbers so that some terms are common.
            let n = rng.usize(0..shape.vocabulary.max(1));
            let n = n.min(rng.usize(0..shape.vocabulary.max(1)));
            let wdf = rng.u64(1..=shape.max_wdf.max(1));
            doc = if positional {
                let positions: Vec<u32> = (0..wdf).map(|_| rng.u32(0..1000)).collect();
                doc.with_positions(term(n), &positions)
            } else {
                doc.with_term(term(n), wdf)
            };
        }
        if positional {
            doc = doc.with_value(rng.u64(..).to_be_bytes().to_vec());
        }
        db.add_document(doc);
    }
    if shape.trailing_docids > 0 {
        db.set_last_docid(db.last_docid() + rng.u32(0..=shape.trailing_docids));
    }
    for i in 0..shape.spelling_entries {
        db.add_spelling(format!("w{i:03}"), format!("{}", rng.u32(1..100)));
    }
    db
}

/// Generates `count` collections from one seed, varying their sizes.
pub fn generate_collections(
    seed: u64,
    count: usize,
    shape: &CollectionShape,
) -> Vec<DatabaseWriter> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count)
        .map(|_| {
            let shape = CollectionShape {
                documents: rng.usize(shape.documents / 2..=shape.documents),
                ..shape.clone()
            };
            generate_collection(rng.u64(..), &shape)
        })
        .collect()
}
