//! Loading the list of entities to harvest.
//!
//! The list is a plain text file with one `<id>: <name>` entry per line.
//! Blank lines and lines without a colon are skipped; loading never fails
//! because of a bad line.

use std::path::Path;

use tracing::{debug, info, warn};

use crate::error::HarvestError;
use crate::models::EntityRecord;

/// Parse target list contents, preserving file order.
#[must_use]
pub fn parse_targets(contents: &str) -> Vec<EntityRecord> {
    let mut entries = Vec::new();

    for (index, raw) in contents.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Some(entry) => {
                debug!(id = %entry.id, name = %entry.name, "Parsed target");
                entries.push(entry);
            }
            None => {
                warn!(line_number = index + 1, line = %line, "Skipping malformed target line");
            }
        }
    }

    entries
}

fn parse_line(line: &str) -> Option<EntityRecord> {
    let (id, name) = line.split_once(':')?;
    let id = id.trim();
    let name = name.trim();
    if id.is_empty() || name.is_empty() {
        return None;
    }
    Some(EntityRecord::new(id, name))
}

/// Read and parse a target list file.
///
/// # Errors
///
/// Returns an error if the file cannot be read. Malformed lines are not errors.
pub async fn load_targets(path: &Path) -> Result<Vec<EntityRecord>, HarvestError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| HarvestError::io(path, e))?;

    let entries = parse_targets(&contents);
    info!(
        path = %path.display(),
        count = entries.len(),
        "Loaded target list"
    );
    Ok(entries)
}

/// Restrict a run to a single entity chosen by id or by name.
///
/// With neither selector the list is returned unchanged. Name matching is
/// case-insensitive. A selector that matches nothing yields an ad-hoc entity
/// built from the selector itself, so one-off runs work without editing the
/// list.
#[must_use]
pub fn select_entities(
    entries: Vec<EntityRecord>,
    id: Option<&str>,
    name: Option<&str>,
) -> Vec<EntityRecord> {
    if let Some(id) = id {
        if let Some(found) = entries.iter().find(|e| e.id == id) {
            return vec![found.clone()];
        }
        warn!(id = %id, "Entity id not in target list, using it as the search name");
        return vec![EntityRecord::new(id, id)];
    }

    if let Some(name) = name {
        if let Some(found) = entries.iter().find(|e| e.name.eq_ignore_ascii_case(name)) {
            return vec![found.clone()];
        }
        warn!(name = %name, "Entity name not in target list, processing it ad hoc");
        return vec![EntityRecord::new(name, name)];
    }

    entries
}

/// Load the list and apply the single-entity selectors.
///
/// When a selector is given the list is only a lookup table: if it cannot
/// be read, the selector alone becomes the entity.
///
/// # Errors
///
/// Returns an error if no selector is given and the list cannot be read.
pub async fn resolve_entities(
    path: &Path,
    id: Option<&str>,
    name: Option<&str>,
) -> Result<Vec<EntityRecord>, HarvestError> {
    let entries = match load_targets(path).await {
        Ok(entries) => entries,
        Err(e) if id.is_some() || name.is_some() => {
            warn!("{e}; continuing with the selected entity only");
            Vec::new()
        }
        Err(e) => return Err(e),
    };
    Ok(select_entities(entries, id, name))
}
