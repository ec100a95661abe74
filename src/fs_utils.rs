use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::HarvestError;

/// Longest file or directory name produced from an entity name.
const MAX_COMPONENT_LEN: usize = 100;

/// Turn an arbitrary entity name into a single safe path component.
///
/// Path separators, characters reserved on common filesystems and control
/// characters become `_`; whitespace runs collapse to one space. Leading
/// dots are stripped so the result is never hidden or a parent reference.
#[must_use]
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_start_matches('.').trim();

    let mut out: String = trimmed.chars().take(MAX_COMPONENT_LEN).collect();
    out = out.trim_end().to_string();

    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}

/// Path with `.part` appended, used while a file is being written.
#[must_use]
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

/// Write `data` to `path` through a temporary sibling and a rename, so a
/// crash never leaves a truncated file under the final name.
///
/// # Errors
///
/// Returns [`HarvestError::Io`] if writing or renaming fails.
pub async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), HarvestError> {
    let part = partial_path(path);
    if let Err(e) = tokio::fs::write(&part, data).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(HarvestError::io(&part, e));
    }
    if let Err(e) = tokio::fs::rename(&part, path).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(HarvestError::io(path, e));
    }
    Ok(())
}

/// Delete files, logging and skipping any that cannot be removed.
pub async fn remove_files_best_effort(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) => debug!(path = %path.display(), "Failed to remove file: {e}"),
        }
    }
    removed
}
