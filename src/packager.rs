//! Bundle an entity's downloads into a zip archive.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

use crate::error::HarvestError;
use crate::fs_utils::{partial_path, remove_files_best_effort};
use crate::models::DownloadResult;

#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveOptions {
    /// Delete the downloaded files once the archive is verified.
    pub archive_only: bool,
    /// Write an archive even when nothing was downloaded.
    pub archive_empty: bool,
}

/// Location of the archive for an entity directory.
#[must_use]
pub fn archive_path(entity_dir: &Path, entity_name: &str) -> PathBuf {
    entity_dir.join(format!("{entity_name}.zip"))
}

/// Zip every successful download in `results` into
/// `<entity_dir>/<entity_name>.zip`.
///
/// Returns `Ok(None)` when there was nothing to archive and empty archives
/// are not requested. In archive-only mode the originals are removed after
/// the written archive has been reopened and its entry count checked.
///
/// # Errors
///
/// Returns [`HarvestError::ArchiveWrite`] if the archive cannot be written
/// or fails verification. Originals are left untouched in that case.
pub async fn archive_entity(
    entity_dir: &Path,
    entity_name: &str,
    results: &[DownloadResult],
    options: ArchiveOptions,
) -> Result<Option<PathBuf>, HarvestError> {
    let files: Vec<PathBuf> = results
        .iter()
        .filter(|r| r.is_success())
        .filter_map(|r| r.local_path.clone())
        .collect();

    if files.is_empty() && !options.archive_empty {
        debug!(entity = %entity_name, "No downloads to archive");
        return Ok(None);
    }

    let target = archive_path(entity_dir, entity_name);
    let part = partial_path(&target);

    let write_files = files.clone();
    let write_part = part.clone();
    let written = tokio::task::spawn_blocking(move || write_zip(&write_part, &write_files))
        .await
        .map_err(|e| e.to_string())
        .and_then(|r| r);

    let result = written.and_then(|entries| {
        if entries == files.len() {
            Ok(())
        } else {
            Err(format!(
                "archive holds {entries} entries, expected {}",
                files.len()
            ))
        }
    });

    if let Err(message) = result {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(HarvestError::ArchiveWrite {
            path: target,
            message,
        });
    }

    if let Err(e) = tokio::fs::rename(&part, &target).await {
        let _ = tokio::fs::remove_file(&part).await;
        return Err(HarvestError::ArchiveWrite {
            path: target,
            message: e.to_string(),
        });
    }

    info!(
        entity = %entity_name,
        path = %target.display(),
        entries = files.len(),
        "Archive written"
    );

    if options.archive_only {
        let removed = remove_files_best_effort(&files).await;
        if removed != files.len() {
            warn!(
                entity = %entity_name,
                removed,
                expected = files.len(),
                "Some originals could not be removed"
            );
        }
    }

    Ok(Some(target))
}

/// Write `files` flat into a new zip at `path`, then reopen it and return
/// the number of entries it contains.
fn write_zip(path: &Path, files: &[PathBuf]) -> Result<usize, String> {
    let out = File::create(path).map_err(|e| format!("create {}: {e}", path.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(out));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for file in files {
        let name = file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("unusable file name {}", file.display()))?;
        zip.start_file(name, options)
            .map_err(|e| format!("start entry {name}: {e}"))?;
        let mut input = File::open(file).map_err(|e| format!("open {}: {e}", file.display()))?;
        std::io::copy(&mut input, &mut zip).map_err(|e| format!("write entry {name}: {e}"))?;
    }

    let mut writer = zip.finish().map_err(|e| format!("finish archive: {e}"))?;
    std::io::Write::flush(&mut writer).map_err(|e| format!("flush archive: {e}"))?;
    drop(writer);

    let reopened = File::open(path).map_err(|e| format!("reopen archive: {e}"))?;
    let archive = ZipArchive::new(reopened).map_err(|e| format!("read back archive: {e}"))?;
    Ok(archive.len())
}
