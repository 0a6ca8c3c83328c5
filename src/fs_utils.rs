use std::{
    fs,
    path::{Path, PathBuf},
    time::SystemTime,
};

use glob::Pattern;
use tracing::warn;

/// Files of `dir` whose name matches `pattern`, sorted by path.
///
/// Only file names are matched, so `dir` itself may contain `[`, `*` or `?`. A missing
/// directory has no files.
pub(crate) fn glob_sorted(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, glob::PatternError> {
    let pattern = Pattern::new(pattern)?;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("could not list {}: {e}", dir.display());
            }
            return Ok(vec![]);
        }
    };

    let mut files = entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("unreadable directory entry: {e}");
                None
            }
        })
        .filter(|entry| pattern.matches(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Most recently modified file of `dir` matching `pattern`.
///
/// Files modified at or after `newer_than` are preferred; when there is none, the newest file
/// overall is returned.
pub(crate) fn newest_matching(dir: &Path, pattern: &str, newer_than: SystemTime) -> Option<PathBuf> {
    let candidates = glob_sorted(dir, pattern)
        .ok()?
        .into_iter()
        .filter_map(|path| modified(&path).map(|time| (time, path)))
        .collect::<Vec<_>>();

    let fresh = candidates
        .iter()
        .filter(|(time, _)| *time >= newer_than)
        .max_by_key(|(time, _)| *time);
    fresh
        .or_else(|| candidates.iter().max_by_key(|(time, _)| *time))
        .map(|(_, path)| path.clone())
}
