use std::path::{Path, PathBuf};

use rubric_compact::{
    CompactionReport, Compactor, CompactorOptions, OffsetStrategy, TableKind,
    chunk::{self, MetaInfo},
    postings::Posting,
};
use rubric_table::{Table, TableBuilder, TableOptions};
use rubric_testkit::{
    DatabaseWriter, Document,
    data_gen::{self, CollectionShape},
    db_writer::{docid_key, position_key},
    dump::{self, DatabaseDump},
};

fn compact(sources: &[PathBuf], dest: &Path, options: CompactorOptions) -> CompactionReport {
    Compactor::new(options)
        .unwrap()
        .compact(sources, dest, |_| {})
        .unwrap()
}

fn docids(dump: &DatabaseDump, term: &[u8]) -> Vec<u32> {
    dump.terms[term].postings.iter().map(|p| p.docid).collect()
}

/// Checks the output against the shifted union of the sources.
fn check_against_sources(sources: &[PathBuf], report: &CompactionReport) -> DatabaseDump {
    let inputs: Vec<_> = sources
        .iter()
        .zip(&report.sources)
        .map(|(path, source)| (dump::dump_database(path).unwrap(), source.offset))
        .collect();
    let expected = dump::expected_merge(&inputs, report.last_docid).unwrap();
    let actual = dump::dump_database(&report.destination).unwrap();
    assert_eq!(actual.meta, expected.meta);
    assert_eq!(actual.terms, expected.terms);
    for kind in TableKind::ALL {
        assert_eq!(actual.table(kind), expected.table(kind), "{kind} table");
    }
    actual
}

#[test]
fn test_cat_example() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut a = DatabaseWriter::new();
    a.add_document(Document::new(1).with_term("cat", 1))
        .add_document(Document::new(3).with_term("cat", 1))
        .set_last_docid(10);
    let mut b = DatabaseWriter::new();
    b.add_document(Document::new(1).with_term("cat", 2))
        .add_document(Document::new(2).with_term("cat", 1));
    let sources = vec![
        a.write(dir.path().join("a")).unwrap(),
        b.write(dir.path().join("b")).unwrap(),
    ];

    let dest = dir.path().join("out");
    let report = compact(&sources, &dest, CompactorOptions::default());
    let offsets: Vec<_> = report.sources.iter().map(|s| s.offset).collect();
    assert_eq!(offsets, vec![0, 10]);
    let lengths: Vec<_> = report.sources.iter().map(|s| s.total_length).collect();
    assert_eq!(lengths, vec![2, 3]);
    assert_eq!(report.last_docid, 12);

    let out = dump::dump_database(&dest).unwrap();
    let cat = &out.terms[&b"cat"[..]];
    assert_eq!((cat.tf, cat.cf), (4, 5));
    assert_eq!(docids(&out, b"cat"), vec![1, 3, 11, 12]);
    assert_eq!(
        out.meta,
        MetaInfo {
            last_docid: 12,
            total_length: 5
        }
    );
    let record: Vec<_> = out.table(TableKind::Record).keys().cloned().collect();
    assert_eq!(
        record,
        vec![docid_key(1), docid_key(3), docid_key(11), docid_key(12)]
    );
    assert_eq!(
        std::fs::read(dest.join(rubric_compact::MARKER_FILE)).unwrap(),
        rubric_testkit::db_writer::DEFAULT_MARKER
    );
}

#[test]
fn test_merge_generated_collections() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let shape = CollectionShape {
        positional_percent: 50,
        ..Default::default()
    };
    let sources: Vec<_> = data_gen::generate_collections(7, 4, &shape)
        .iter()
        .enumerate()
        .map(|(i, db)| db.write(dir.path().join(format!("src{i}"))).unwrap())
        .collect();

    let options = CompactorOptions {
        verify: true,
        ..Default::default()
    };
    let report = compact(&sources, &dir.path().join("out"), options);
    let out = check_against_sources(&sources, &report);

    // Every source's documents land in their own docid range.
    let mut end = 0;
    for (path, source) in sources.iter().zip(&report.sources) {
        let input = dump::dump_database(path).unwrap();
        let Some(first) = input.terms.values().flat_map(|t| &t.postings).map(|p| p.docid).min()
        else {
            continue;
        };
        assert!(first + source.offset > end);
        end = source.last_docid + source.offset;
    }
    let verified = report.verified.as_ref().unwrap();
    assert_eq!(verified.postings as usize, out.posting_count());
    assert_eq!(verified.terms as usize, out.terms.len());
}

#[test]
fn test_single_source_is_preserved() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let shape = CollectionShape {
        max_first_docid: 40,
        ..Default::default()
    };
    let source = data_gen::generate_collection(11, &shape)
        .write(dir.path().join("src"))
        .unwrap();

    let dest = dir.path().join("out");
    let report = compact(&[source.clone()], &dest, CompactorOptions::default());
    assert_eq!(report.sources[0].offset, 0);
    assert_eq!(
        dump::dump_database(&dest).unwrap(),
        dump::dump_database(&source).unwrap()
    );
}

#[test]
fn test_empty_source_advances_offsets() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut a = DatabaseWriter::new();
    for docid in 1..=3 {
        a.add_document(Document::new(docid).with_term("x", 1));
    }
    let mut empty = DatabaseWriter::new();
    empty.set_last_docid(5);
    let mut b = DatabaseWriter::new();
    for docid in 1..=2 {
        b.add_document(Document::new(docid).with_term("x", 2));
    }
    let sources = vec![
        a.write(dir.path().join("a")).unwrap(),
        empty.write(dir.path().join("empty")).unwrap(),
        b.write(dir.path().join("b")).unwrap(),
    ];

    let report = compact(&sources, &dir.path().join("out"), CompactorOptions::default());
    let offsets: Vec<_> = report.sources.iter().map(|s| s.offset).collect();
    assert_eq!(offsets, vec![0, 3, 8]);
    assert_eq!(report.last_docid, 10);

    let out = check_against_sources(&sources, &report);
    assert_eq!(docids(&out, b"x"), vec![1, 2, 3, 9, 10]);
    assert_eq!(out.meta.total_length, 3 + 4);
}

#[test]
fn test_append_and_reclaim_offsets() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut a = DatabaseWriter::new();
    for docid in 1..=4 {
        a.add_document(Document::new(docid).with_term("y", 1));
    }
    let mut b = DatabaseWriter::new();
    for docid in 100..=102 {
        b.add_document(Document::new(docid).with_term("y", 1));
    }
    let sources = vec![
        a.write(dir.path().join("a")).unwrap(),
        b.write(dir.path().join("b")).unwrap(),
    ];

    let reclaim = compact(&sources, &dir.path().join("reclaim"), CompactorOptions::default());
    assert_eq!(reclaim.last_docid, 102);
    let out = check_against_sources(&sources, &reclaim);
    assert_eq!(docids(&out, b"y"), vec![1, 2, 3, 4, 100, 101, 102]);

    let append = compact(
        &sources,
        &dir.path().join("append"),
        CompactorOptions {
            offsets: OffsetStrategy::Append,
            ..Default::default()
        },
    );
    assert_eq!(append.last_docid, 106);
    let out = check_against_sources(&sources, &append);
    assert_eq!(docids(&out, b"y"), vec![1, 2, 3, 4, 104, 105, 106]);
}

#[test]
fn test_spelling_from_first_source_only() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut a = DatabaseWriter::new();
    a.add_document(Document::new(1).with_term("a", 1));
    let mut b = DatabaseWriter::new();
    b.add_document(Document::new(1).with_term("b", 1))
        .add_spelling("wb", "1")
        .add_synonym("car", "auto");
    let mut c = DatabaseWriter::new();
    c.add_document(Document::new(1).with_term("c", 1))
        .add_spelling("wc", "2");
    let sources = vec![
        a.write(dir.path().join("a")).unwrap(),
        b.write(dir.path().join("b")).unwrap(),
        c.write(dir.path().join("c")).unwrap(),
    ];

    let report = compact(&sources, &dir.path().join("out"), CompactorOptions::default());
    let spelling = report
        .tables
        .iter()
        .find(|t| t.kind == TableKind::Spelling)
        .unwrap();
    assert_eq!(spelling.ignored_sources, vec![sources[2].join("spelling.db")]);
    assert_eq!(spelling.entries, 1);
    let synonym = report
        .tables
        .iter()
        .find(|t| t.kind == TableKind::Synonym)
        .unwrap();
    assert!(synonym.ignored_sources.is_empty());

    let out = check_against_sources(&sources, &report);
    assert!(out.table(TableKind::Spelling).contains_key(&b"wb"[..]));
    assert!(!out.table(TableKind::Spelling).contains_key(&b"wc"[..]));
}

#[test]
fn test_position_keys_keep_their_suffix() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut a = DatabaseWriter::new();
    a.add_document(Document::new(1).with_positions("dog", &[1, 4]))
        .set_last_docid(10);
    let mut b = DatabaseWriter::new();
    b.add_document(Document::new(1).with_positions("dog", &[2]))
        .add_document(Document::new(300).with_positions("z\0z", &[9]).with_value("v"));
    let sources = vec![
        a.write(dir.path().join("a")).unwrap(),
        b.write(dir.path().join("b")).unwrap(),
    ];

    let report = compact(&sources, &dir.path().join("out"), CompactorOptions::default());
    let out = check_against_sources(&sources, &report);
    let keys: Vec<_> = out.table(TableKind::Position).keys().cloned().collect();
    assert_eq!(
        keys,
        vec![
            position_key(1, b"dog"),
            position_key(11, b"dog"),
            position_key(310, b"z\0z"),
        ]
    );
    assert_eq!(
        out.table(TableKind::Value).keys().cloned().collect::<Vec<_>>(),
        vec![docid_key(310)]
    );
}

#[test]
fn test_compaction_levels_agree() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let shape = CollectionShape {
        documents: 600,
        ..Default::default()
    };
    let sources: Vec<_> = data_gen::generate_collections(3, 2, &shape)
        .iter()
        .enumerate()
        .map(|(i, db)| db.write(dir.path().join(format!("src{i}"))).unwrap())
        .collect();

    let mut blocks = Vec::new();
    let mut dumps = Vec::new();
    for (name, compaction) in [
        ("standard", rubric_compact::Compaction::Standard),
        ("full", rubric_compact::Compaction::Full),
        ("fuller", rubric_compact::Compaction::Fuller),
    ] {
        let options = CompactorOptions {
            block_size: 2048,
            compaction,
            ..Default::default()
        };
        let report = compact(&sources, &dir.path().join(name), options);
        let postlist = Table::open(report.destination.join("postlist.db")).unwrap();
        assert_eq!(postlist.block_size(), 2048);
        blocks.push(postlist.block_count());
        dumps.push(dump::dump_database(&report.destination).unwrap());
    }
    // Standard compaction leaves room in every block.
    assert!(blocks[0] > blocks[1]);
    assert_eq!(dumps[0], dumps[1]);
    assert_eq!(dumps[1], dumps[2]);
}

#[test]
fn test_reports_each_table() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let shape = CollectionShape::default();
    let source = data_gen::generate_collection(5, &shape)
        .write(dir.path().join("src"))
        .unwrap();

    let mut seen = Vec::new();
    let report = Compactor::new(CompactorOptions::default())
        .unwrap()
        .compact(&[&source], dir.path().join("out"), |stats| {
            seen.push(stats.kind)
        })
        .unwrap();
    assert_eq!(seen, TableKind::ALL);
    let record = &report.tables[1];
    assert_eq!(record.entries, shape.documents as u64);
    assert!(record.input_bytes.unwrap() > 0);

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["tables"].as_array().unwrap().len(), 7);
    assert_eq!(json["tables"][0]["kind"], "postlist");
    assert_eq!(json["options"]["offsets"], "reclaim_leading");
}

#[test]
fn test_destination_may_not_be_a_source() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let source = data_gen::generate_collection(1, &CollectionShape::default())
        .write(dir.path().join("src"))
        .unwrap();
    let before = dump::dump_database(&source).unwrap();

    let err = Compactor::new(CompactorOptions::default())
        .unwrap()
        .compact(&[&source], &source, |_| {})
        .unwrap_err();
    assert!(err.to_string().contains("same as any source"), "{err}");
    assert_eq!(dump::dump_database(&source).unwrap(), before);
}

#[test]
fn test_missing_metainfo_is_corruption() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut db = DatabaseWriter::new();
    db.add_document(Document::new(1).with_term("a", 1));
    let source = db.write(dir.path().join("src")).unwrap();

    // Replace the posting list with one lacking the metainfo record.
    let mut postlist = TableBuilder::create(source.join("postlist.db"), TableOptions::default())
        .unwrap();
    let mut tag = Vec::new();
    chunk::ChunkHeader {
        tf: 1,
        cf: 1,
        first_docid: 1,
    }
    .encode(&mut tag);
    tag.push(chunk::LAST_CHUNK);
    rubric_compact::postings::encode_postings(&mut tag, &[Posting::new(1, 1)]);
    postlist.add(&chunk::initial_chunk_key(b"a"), &tag).unwrap();
    postlist.commit(1).unwrap();

    let dest = dir.path().join("out");
    let err = Compactor::new(CompactorOptions::default())
        .unwrap()
        .compact(&[&source], &dest, |_| {})
        .unwrap_err();
    assert!(err.is_corruption(), "{err}");
    assert!(!dest.join("postlist.db").exists());
}

#[test]
fn test_failed_compaction_leaves_no_tables() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut db = DatabaseWriter::new();
    db.add_document(Document::new(1).with_term("a", 1));
    let a = db.write(dir.path().join("a")).unwrap();
    let b = db.write(dir.path().join("b")).unwrap();
    std::fs::remove_file(b.join("termlist.db")).unwrap();

    let dest = dir.path().join("out");
    let err = Compactor::new(CompactorOptions::default())
        .unwrap()
        .compact(&[&a, &b], &dest, |_| {})
        .unwrap_err();
    assert!(!err.is_corruption());
    for kind in TableKind::ALL {
        assert!(!dest.join(kind.file_name()).exists(), "{kind}");
    }
}

#[test]
fn test_failed_verification_leaves_no_database() {
    let dir = rubric_testkit::temp_dir().unwrap();
    let mut db = DatabaseWriter::new();
    db.add_document(Document::new(1).with_term("a", 1));
    let source = db.write(dir.path().join("src")).unwrap();

    // The initial chunk claims two postings but holds one.
    let mut postlist = TableBuilder::create(source.join("postlist.db"), TableOptions::default())
        .unwrap();
    let meta = MetaInfo {
        last_docid: 1,
        total_length: 1,
    };
    postlist.add(chunk::METAINFO_KEY, &meta.encode_tag()).unwrap();
    let mut tag = Vec::new();
    chunk::ChunkHeader {
        tf: 2,
        cf: 1,
        first_docid: 1,
    }
    .encode(&mut tag);
    tag.push(chunk::LAST_CHUNK);
    rubric_compact::postings::encode_postings(&mut tag, &[Posting::new(1, 1)]);
    postlist.add(&chunk::initial_chunk_key(b"a"), &tag).unwrap();
    postlist.commit(1).unwrap();

    let dest = dir.path().join("out");
    let options = CompactorOptions {
        verify: true,
        ..Default::default()
    };
    let err = Compactor::new(options)
        .unwrap()
        .compact(&[&source], &dest, |_| {})
        .unwrap_err();
    assert!(err.is_corruption(), "{err}");
    assert!(!dest.join(rubric_compact::MARKER_FILE).exists());
    assert!(!rubric_compact::SourceDatabase::is_database(&dest));
    for kind in TableKind::ALL {
        assert!(!dest.join(kind.file_name()).exists(), "{kind}");
    }
}
