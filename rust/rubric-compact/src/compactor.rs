//! The compaction driver: merges every table of the source databases into a
//! new database directory.

use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

use rubric_common::{Result, error::Error, verify_arg};
use rubric_table::{Table, TableBuilder};
use serde::Serialize;

use crate::{
    DocId,
    config::CompactorOptions,
    kind::{MergeContext, TableKind},
    reader::{self, PostlistSummary},
    source::{self, MARKER_FILE, SourceDatabase},
};

/// Largest marker file that is copied to the destination.
const MAX_MARKER_SIZE: u64 = 1024;

/// Size and entry count of one merged table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub kind: TableKind,
    /// Combined size of the table in all sources, or `None` if some source
    /// file could not be examined.
    pub input_bytes: Option<u64>,
    /// Size of the merged table; zero when a lazy table was not created.
    pub output_bytes: Option<u64>,
    pub entries: u64,
    /// Source tables whose data was discarded.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignored_sources: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceReport {
    pub path: PathBuf,
    pub offset: DocId,
    pub doc_count: u64,
    pub last_docid: DocId,
    pub total_length: u64,
}

/// Result of a successful compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub options: CompactorOptions,
    pub destination: PathBuf,
    pub sources: Vec<SourceReport>,
    /// Highest document id of the merged database.
    pub last_docid: DocId,
    pub tables: Vec<TableStats>,
    /// Intermediate posting list merge rounds.
    pub multipass_rounds: usize,
    /// Outcome of the post-merge check, when enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<PostlistSummary>,
}

/// Merges and compacts databases.
///
/// ```no_run
/// use rubric_compact::{Compactor, CompactorOptions};
///
/// let compactor = Compactor::new(CompactorOptions::default())?;
/// let report = compactor.compact(&["db1", "db2"], "merged", |stats| {
///     println!("{}: {} entries", stats.kind, stats.entries);
/// })?;
/// println!("last docid {}", report.last_docid);
/// # Ok::<(), rubric_common::error::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct Compactor {
    options: CompactorOptions,
}

impl Compactor {
    pub fn new(options: CompactorOptions) -> Result<Compactor> {
        options.validate()?;
        Ok(Compactor { options })
    }

    pub fn options(&self) -> &CompactorOptions {
        &self.options
    }

    /// Merges the databases in `sources` into a new database at
    /// `destination`, calling `on_table` as each table is committed.
    pub fn compact<P: AsRef<Path>>(
        &self,
        sources: &[P],
        destination: impl AsRef<Path>,
        mut on_table: impl FnMut(&TableStats),
    ) -> Result<CompactionReport> {
        let destination = destination.as_ref();
        verify_arg!(sources, !sources.is_empty());
        check_destination(sources, destination)?;
        for source in sources {
            let source = source.as_ref();
            if !SourceDatabase::is_database(source) {
                return Err(Error::invalid_arg(
                    "source",
                    format!("'{}' is not a rubric database directory", source.display()),
                ));
            }
        }

        fs::create_dir_all(destination)
            .map_err(|e| Error::io(destination.display().to_string(), e))?;

        let databases = sources
            .iter()
            .map(SourceDatabase::open)
            .collect::<Result<Vec<_>>>()?;
        let (offsets, last_docid) = source::assign_offsets(&databases, self.options.offsets)?;
        let placed: Vec<(PathBuf, DocId)> = databases
            .iter()
            .zip(&offsets)
            .map(|(db, &offset)| (db.path().to_path_buf(), offset))
            .collect();

        let mut committed = CommittedTables::default();
        let mut tables = Vec::with_capacity(TableKind::ALL.len());
        let mut multipass_rounds = 0;
        for kind in TableKind::ALL {
            let path = destination.join(kind.file_name());
            let mut out = TableBuilder::create(&path, self.options.table_options(kind))?;
            let ctx = MergeContext {
                kind,
                sources: &placed,
                destination,
                options: &self.options,
                last_docid,
            };
            let outcome = kind.merger().merge(&ctx, &mut out)?;
            let summary = out.commit(1)?;
            committed.paths.push(path);
            multipass_rounds += outcome.multipass_rounds;

            let stats = TableStats {
                kind,
                input_bytes: input_size(databases.iter().map(|db| db.table_path(kind))),
                output_bytes: Some(summary.file_size.unwrap_or(0)),
                entries: summary.entry_count,
                ignored_sources: outcome.ignored_sources,
            };
            log::info!(
                "{kind}: {} entries, {} -> {} bytes",
                stats.entries,
                display_size(stats.input_bytes),
                display_size(stats.output_bytes)
            );
            on_table(&stats);
            tables.push(stats);
        }

        let verified = if self.options.verify {
            let table = Table::open(destination.join(TableKind::Postlist.file_name()))?;
            let summary = reader::verify_postlist(&table)?;
            log::info!(
                "verified {} terms, {} postings in {} chunks",
                summary.terms,
                summary.postings,
                summary.chunks
            );
            Some(summary)
        } else {
            None
        };
        // The marker goes last so a failed run never leaves a destination
        // that looks like a database.
        copy_marker(databases[0].path(), destination)?;
        committed.keep();

        Ok(CompactionReport {
            options: self.options.clone(),
            destination: destination.to_path_buf(),
            sources: databases
                .iter()
                .zip(&offsets)
                .map(|(db, &offset)| SourceReport {
                    path: db.path().to_path_buf(),
                    offset,
                    doc_count: db.doc_count(),
                    last_docid: db.last_docid(),
                    total_length: db.total_length(),
                })
                .collect(),
            last_docid,
            tables,
            multipass_rounds,
            verified,
        })
    }
}

/// Tables committed by an unfinished compaction, removed unless the
/// compaction completes.
#[derive(Default)]
struct CommittedTables {
    paths: Vec<PathBuf>,
}

impl CommittedTables {
    fn keep(&mut self) {
        self.paths.clear();
    }
}

impl Drop for CommittedTables {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = rubric_table::remove_table(path) {
                log::warn!("failed to remove incomplete output table: {e}");
            }
        }
    }
}

/// Rejects a destination that resolves to one of the source directories.
fn check_destination<P: AsRef<Path>>(sources: &[P], destination: &Path) -> Result<()> {
    let resolve = |path: &Path| {
        fs::canonicalize(path)
            .or_else(|_| std::path::absolute(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    let destination = resolve(destination);
    for source in sources {
        if resolve(source.as_ref()) == destination {
            return Err(Error::invalid_arg(
                "destination",
                format!(
                    "'{}' may not be the same as any source directory",
                    destination.display()
                ),
            ));
        }
    }
    Ok(())
}

/// Sums the sizes of the given table files. Missing files count as empty;
/// any other failure makes the total unknown.
fn input_size(paths: impl Iterator<Item = PathBuf>) -> Option<u64> {
    let mut total = 0u64;
    for path in paths {
        match fs::metadata(&path) {
            Ok(meta) => total += meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                log::warn!("cannot stat {}: {e}", path.display());
                return None;
            }
        }
    }
    Some(total)
}

fn display_size(size: Option<u64>) -> String {
    size.map_or_else(|| "?".to_string(), |size| size.to_string())
}

/// Copies the marker file of `source` into `destination` through a
/// temporary file.
fn copy_marker(source: &Path, destination: &Path) -> Result<()> {
    let src = source.join(MARKER_FILE);
    let context = src.display().to_string();
    let file = fs::File::open(&src).map_err(|e| Error::io(context.clone(), e))?;
    let mut contents = Vec::new();
    file.take(MAX_MARKER_SIZE + 1)
        .read_to_end(&mut contents)
        .map_err(|e| Error::io(context.clone(), e))?;
    if contents.len() as u64 > MAX_MARKER_SIZE {
        return Err(Error::corrupt(
            "marker file",
            format!("{context} is larger than {MAX_MARKER_SIZE} bytes"),
        ));
    }

    let tmp = destination.join(format!("{MARKER_FILE}.tmp"));
    let dest = destination.join(MARKER_FILE);
    fs::write(&tmp, &contents).map_err(|e| Error::io(tmp.display().to_string(), e))?;
    fs::rename(&tmp, &dest).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::io(dest.display().to_string(), e)
    })?;
    Ok(())
}
