//! Zip archive verification and extraction.
//!
//! Both operations are synchronous and meant to run on the blocking pool.

use snafu::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::{
    ArchiveError, CorruptArchiveSnafu, CreateRawDirSnafu, ExtractEntrySnafu, OpenArchiveSnafu,
    ReadEntrySnafu,
};

fn open(path: &Path) -> Result<ZipArchive<BufReader<File>>, ArchiveError> {
    let file = File::open(path).context(OpenArchiveSnafu { path })?;
    ZipArchive::new(BufReader::new(file)).context(CorruptArchiveSnafu { path })
}

/// Check archive structure and every entry's checksum.
///
/// Entries are decompressed to a sink; a truncated archive or a CRC
/// mismatch yields [`ArchiveError::CorruptArchive`].
pub fn verify(path: &Path) -> Result<(), ArchiveError> {
    let mut archive = open(path)?;
    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .context(CorruptArchiveSnafu { path })?;
        std::io::copy(&mut entry, &mut std::io::sink())
            .map_err(ZipError::Io)
            .context(CorruptArchiveSnafu { path })?;
    }
    Ok(())
}

/// Extract every file entry of `path` into `dest`, flattening any
/// directories inside the archive. Existing files are overwritten.
///
/// Returns the extracted paths.
pub fn extract(path: &Path, dest: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    std::fs::create_dir_all(dest).context(CreateRawDirSnafu { path: dest })?;

    let mut archive = open(path)?;
    let mut extracted = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .context(ReadEntrySnafu { path, index })?;
        if entry.is_dir() {
            continue;
        }

        let Some(file_name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_owned()))
        else {
            warn!(
                "Skipping unsafe entry '{}' in {}",
                entry.name(),
                path.display()
            );
            continue;
        };

        let target = dest.join(&file_name);
        let entry_name = file_name.to_string_lossy().into_owned();
        let mut out = File::create(&target).context(ExtractEntrySnafu {
            path,
            entry: &entry_name,
        })?;
        let bytes = std::io::copy(&mut entry, &mut out).context(ExtractEntrySnafu {
            path,
            entry: &entry_name,
        })?;

        debug!("Extracted {entry_name} ({bytes} bytes) to {}", dest.display());
        extracted.push(target);
    }

    Ok(extracted)
}
