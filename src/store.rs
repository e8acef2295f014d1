use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;

use crate::domain::{FipsCode, GeoFileType};
use crate::error::CensusError;

/// Deterministic on-disk layout under a data root.
///
/// Every per-state artefact is a pure function of the FIPS code, so reruns
/// overwrite the previous output for the same code.
#[derive(Debug, Clone)]
pub struct Layout {
    root: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn census_dir(&self) -> Utf8PathBuf {
        self.root.join("census")
    }

    pub fn fips_table_path(&self) -> Utf8PathBuf {
        self.census_dir().join("csv").join("census_block_tally.xlsx")
    }

    pub fn shapefile_dir(&self, fips: &FipsCode) -> Utf8PathBuf {
        self.census_dir().join("shp").join(fips.as_str())
    }

    pub fn path_for(&self, fips: &FipsCode, file_type: GeoFileType) -> Utf8PathBuf {
        match file_type {
            GeoFileType::Shp => self
                .shapefile_dir(fips)
                .join(format!("tl_2010_{fips}_tract10.shp")),
            GeoFileType::GeoJson => self.census_dir().join("geojson").join(format!("{fips}.json")),
        }
    }

    pub fn population_path(&self, fips: &FipsCode) -> Utf8PathBuf {
        self.census_dir()
            .join("pop")
            .join("acs_census")
            .join(format!("acs_census_data_state_{fips}.csv"))
    }

    pub fn merged_path(&self, fips: &FipsCode) -> Utf8PathBuf {
        self.census_dir().join("merged").join(format!("{fips}.json"))
    }

    pub fn downloads_dir(&self) -> Utf8PathBuf {
        self.root.join("tmp").join("downloads")
    }
}

pub fn ensure_parent(path: &Utf8Path) -> Result<(), CensusError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| CensusError::Filesystem(format!("create {parent}: {err}")))?;
    }
    Ok(())
}

/// Writes through a sibling temp file and renames it into place.
pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), CensusError> {
    ensure_parent(path)?;
    let parent = path
        .parent()
        .ok_or_else(|| CensusError::Filesystem(format!("invalid destination path {path}")))?;
    let mut temp = Builder::new()
        .prefix(".census-etl")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| CensusError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| CensusError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| CensusError::Filesystem(format!("persist {path}: {err}")))?;
    Ok(())
}

pub fn atomic_rename_dir(from: &Utf8Path, to: &Utf8Path) -> Result<(), CensusError> {
    if to.as_std_path().exists() {
        fs::remove_dir_all(to.as_std_path())
            .map_err(|err| CensusError::Filesystem(err.to_string()))?;
    }
    ensure_parent(to)?;
    fs::rename(from.as_std_path(), to.as_std_path())
        .map_err(|err| CensusError::Filesystem(format!("rename {from} -> {to}: {err}")))
}
