use std::fs;
use std::io;
use std::path::Path;

use zip::ZipArchive;

use crate::error::CensusError;

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<usize, CensusError> {
    let mut archive = open_archive(zip_path)?;

    let mut files = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CensusError::Filesystem(err.to_string()))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(CensusError::Filesystem(format!(
                "zip entry path traversal detected in {}",
                zip_path.display()
            )));
        };
        let entry_path = target_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| CensusError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| CensusError::Filesystem(err.to_string()))?;
        }
        let mut outfile = fs::File::create(&entry_path)
            .map_err(|err| CensusError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile)
            .map_err(|err| CensusError::Filesystem(err.to_string()))?;
        files += 1;
    }
    Ok(files)
}

/// Reads every entry through to catch truncated or corrupt archives before
/// anything is extracted.
pub fn validate_zip(zip_path: &Path) -> Result<(), CensusError> {
    let mut archive = open_archive(zip_path)?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| CensusError::Filesystem(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink())
            .map_err(|err| CensusError::Filesystem(err.to_string()))?;
    }
    Ok(())
}

fn open_archive(zip_path: &Path) -> Result<ZipArchive<fs::File>, CensusError> {
    let file = fs::File::open(zip_path).map_err(|err| {
        CensusError::Filesystem(format!("open zip {}: {err}", zip_path.display()))
    })?;
    ZipArchive::new(file)
        .map_err(|err| CensusError::Filesystem(format!("read zip {}: {err}", zip_path.display())))
}
