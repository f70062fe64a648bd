//! Deterministic artifact naming and discovery in the output directory.
//!
//! Every artifact is named `{job_id}_{suffix}.{ext}`. The engines are told to
//! write to that stem, and success is judged by finding it afterwards.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use crate::job::MediaFormat;

/// File stem for a job's artifact of the given format.
pub fn artifact_stem(job_id: &Uuid, format: MediaFormat) -> String {
    format!("{}_{}", job_id, format.artifact_suffix())
}

/// Output template handed to the extractor (`%(ext)s` is filled in by the engine).
pub fn output_template(output_dir: &Path, stem: &str) -> String {
    output_dir
        .join(format!("{}.%(ext)s", stem))
        .to_string_lossy()
        .into_owned()
}

/// Find the first non-empty `{stem}.{ext}` for `ext` in preference order.
///
/// Intermediate files such as `{stem}.f137.mp4` or `{stem}.mp4.part` never
/// match, so partial output from an interrupted attempt is not picked up.
pub async fn find_artifact(
    output_dir: &Path,
    stem: &str,
    extensions: &[String],
) -> io::Result<Option<PathBuf>> {
    for ext in extensions {
        let candidate = output_dir.join(format!("{}.{}", stem, ext));
        match fs::metadata(&candidate).await {
            Ok(meta) if meta.is_file() && meta.len() > 0 => return Ok(Some(candidate)),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(None)
}

/// Delete every file starting with `{stem}.`. Returns how many were removed.
pub async fn purge_stem(output_dir: &Path, stem: &str) -> io::Result<usize> {
    let prefix = format!("{}.", stem);
    let mut entries = match fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !name.to_string_lossy().starts_with(&prefix) {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!("Removed leftover {}", entry.path().display());
                removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

/// File name component of an artifact path, as recorded in the job's file map.
pub fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
