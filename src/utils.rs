//! Filesystem and string helpers shared across commands.

use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Sums the size of every file under `path` and returns it in megabytes.
///
/// Unreadable entries are skipped rather than failing the whole walk, so a
/// permission error deep in one clone does not break the summary line.
pub fn dir_size_mb(path: &Path) -> std::io::Result<f64> {
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        ));
    }

    let mut total_bytes: u64 = 0;
    for entry in WalkDir::new(path).into_iter().filter_map(Result::ok) {
        if entry.file_type().is_file() {
            if let Ok(meta) = entry.metadata() {
                total_bytes += meta.len();
            }
        }
    }

    Ok(total_bytes as f64 / 1_000_000.0)
}

/// Appends a trailing path separator if the path does not already end in one.
pub fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    }
}

/// Resolves a token value that may be either a literal or a path to a file
/// holding the token on its first line.
pub fn token_from_value(value: &str) -> String {
    let candidate = Path::new(value);
    if candidate.is_absolute() && candidate.is_file() {
        if let Ok(contents) = fs::read_to_string(candidate) {
            if let Some(line) = contents.lines().next() {
                return line.trim().to_string();
            }
        }
    }
    value.to_string()
}

/// Formats a duration in whole seconds the way the end-of-run summary wants
/// it, switching to minutes past sixty seconds.
pub fn format_duration_text(duration_seconds: u64) -> String {
    if duration_seconds >= 60 {
        let minutes = duration_seconds / 60;
        let seconds = duration_seconds % 60;
        if seconds > 0 {
            format!(" (completed in {minutes}m{seconds}s)")
        } else {
            format!(" (completed in {minutes}m)")
        }
    } else {
        format!(" (completed in {duration_seconds}s)")
    }
}
