//! Bounded fan-in merging of many posting lists.
//!
//! While there are more than `fan_in` posting lists, adjacent lists are
//! merged in groups of two (the last group takes three when the count is odd)
//! into uncompressed temporary tables, and the temporary tables replace their
//! group in the list. Each group is merged with offsets relative to the
//! smallest offset in the group, and the temporary table carries that
//! smallest offset into the next round, so every document ends up with the
//! same id as in a direct merge.
//!
//! A round's temporary tables are deleted once the next round (or the final
//! merge) has consumed them. Source tables are never deleted.

use std::{
    ops::Range,
    path::{Path, PathBuf},
};

use rubric_common::{Result, verify_arg};
use rubric_table::{TableBuilder, TableOptions};

use crate::{
    DocId,
    merge::{self, PostlistMergeStats, PostlistSource},
};

/// Splits `len` items into adjacent pairs, with a trailing triple when `len`
/// is odd.
pub fn group_ranges(len: usize) -> Vec<Range<usize>> {
    let mut groups = Vec::with_capacity(len / 2);
    let mut start = 0;
    while start < len {
        let mut end = (start + 2).min(len);
        if end + 1 == len {
            end += 1;
        }
        groups.push(start..end);
        start = end;
    }
    groups
}

/// A temporary table that is deleted when dropped.
#[derive(Debug)]
pub struct TempTable {
    path: PathBuf,
}

impl TempTable {
    pub fn new(path: impl Into<PathBuf>) -> TempTable {
        TempTable { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempTable {
    fn drop(&mut self) {
        if let Err(e) = rubric_table::remove_table(&self.path) {
            log::warn!("failed to remove temporary table: {e}");
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultipassStats {
    /// Number of intermediate rounds performed before the final merge.
    pub rounds: usize,
    /// Counters of the final merge.
    pub final_merge: PostlistMergeStats,
}

/// Merges `sources` into `out`, going through temporary tables in
/// `temp_dir` while there are more than `fan_in` of them.
pub fn merge_multipass(
    out: &mut TableBuilder,
    sources: &[PostlistSource],
    last_docid: DocId,
    fan_in: usize,
    temp_dir: &Path,
    temp_options: &TableOptions,
) -> Result<MultipassStats> {
    verify_arg!(fan_in, fan_in >= 2);
    let mut current = sources.to_vec();
    // Guards for the inputs of the current round that were produced by the
    // previous round.
    let mut temps: Vec<TempTable> = Vec::new();
    let mut rounds = 0;

    while current.len() > fan_in {
        let mut next = Vec::new();
        let mut next_temps = Vec::new();
        for (group_no, range) in group_ranges(current.len()).into_iter().enumerate() {
            let group = &current[range];
            let base = group.iter().map(|s| s.offset).min().unwrap_or(0);
            let relative: Vec<_> = group
                .iter()
                .map(|s| PostlistSource::new(&s.path, s.offset - base))
                .collect();
            let path = temp_dir.join(format!("tmp{rounds}_{group_no}.db"));
            next_temps.push(TempTable::new(&path));
            merge::merge_postlists_into(
                &path,
                temp_options.clone(),
                &relative,
                last_docid.saturating_sub(base),
            )?;
            next.push(PostlistSource::new(path, base));
        }
        log::info!(
            "postlist merge round {rounds}: {} tables merged into {}",
            current.len(),
            next.len()
        );
        current = next;
        temps = next_temps;
        rounds += 1;
    }

    let final_merge = merge::merge_postlists(out, &current, last_docid)?;
    drop(temps);
    Ok(MultipassStats {
        rounds,
        final_merge,
    })
}
