//! Durable per-run statistics table.
//!
//! One delimited row is appended per run. The file is never rewritten in
//! place: when the header schema changes, a side file named after the
//! sha256 of the new header starts a fresh history and the old file stays
//! untouched.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

pub const STATS_FILE_NAME: &str = "_gitfleet_stats.csv";

pub const STATS_HEADER: &str = "datetime,clonePath,scm,cloneType,cloneTarget,totalCount,\
newClonesCount,existingResourcesPulledCount,dirSizeInMB,newCommits,syncedCount,\
cloneInfosCount,cloneErrorsCount,updateRemoteCount,pruneCount,hasCollisions,\
ignoreFileUsed,onlyFileUsed,totalDurationSeconds,gitfleetVersion";

/// Everything one row records about a run.
pub struct StatsRow {
    pub datetime: String,
    pub clone_path: String,
    pub scm: String,
    pub clone_type: String,
    pub clone_target: String,
    pub total_count: usize,
    pub new_clones_count: u64,
    pub pulled_count: u64,
    pub dir_size_mb: f64,
    pub new_commits: u64,
    pub synced_count: u64,
    pub clone_infos_count: usize,
    pub clone_errors_count: usize,
    pub update_remote_count: u64,
    pub prune_count: usize,
    pub has_collisions: bool,
    pub ignore_file_used: bool,
    pub only_file_used: bool,
    pub total_duration_seconds: u64,
    pub version: String,
}

impl StatsRow {
    fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{:.2},{},{},{},{},{},{},{},{},{},{},{}",
            self.datetime,
            self.clone_path,
            self.scm,
            self.clone_type,
            self.clone_target,
            self.total_count,
            self.new_clones_count,
            self.pulled_count,
            self.dir_size_mb,
            self.new_commits,
            self.synced_count,
            self.clone_infos_count,
            self.clone_errors_count,
            self.update_remote_count,
            self.prune_count,
            self.has_collisions,
            self.ignore_file_used,
            self.only_file_used,
            self.total_duration_seconds,
            self.version,
        )
    }
}

/// Where the stats table for this run lives.
pub fn stats_file_path(stats_root: &Path) -> PathBuf {
    stats_root.join(STATS_FILE_NAME)
}

fn read_first_line(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("could not open stats file {}", path.display()))?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line)?;
    Ok(line.trim_end_matches('\n').to_string())
}

fn header_hash(header: &str) -> String {
    let digest = Sha256::digest(header.as_bytes());
    format!("{digest:x}")
}

/// Appends one run to the table, creating the file with the header when
/// missing. On header drift the row lands in a hash-named side file and
/// the old history stays byte-identical.
pub fn append_row(stats_root: &Path, row: &StatsRow) -> Result<()> {
    let primary = stats_file_path(stats_root);
    let mut file = if primary.exists() {
        let existing_header = read_first_line(&primary)?;
        if existing_header == STATS_HEADER {
            OpenOptions::new()
                .append(true)
                .open(&primary)
                .with_context(|| format!("could not append to {}", primary.display()))?
        } else {
            let side_path = stats_root.join(format!(
                "gitfleet_stats_new_header_{}.csv",
                header_hash(STATS_HEADER)
            ));
            open_with_header(&side_path)?
        }
    } else {
        open_with_header(&primary)?
    };

    writeln!(file, "{}", row.to_line())?;
    Ok(())
}

fn open_with_header(path: &Path) -> Result<File> {
    let exists = path.exists();
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("could not create stats file {}", path.display()))?;
    if !exists {
        writeln!(file, "{STATS_HEADER}")?;
    }
    Ok(file)
}
