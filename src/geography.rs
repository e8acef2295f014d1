use std::path::{Path, PathBuf};
use std::process::Command;

use camino::Utf8PathBuf;
use tracing::info;

use crate::domain::{FipsCode, GeoFileType};
use crate::download::{self, Downloader};
use crate::error::CensusError;
use crate::store::{self, Layout};

/// Where one state's tract archive comes from and where it is unpacked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TractSource {
    pub fips: FipsCode,
    pub url: String,
    pub destination: Utf8PathBuf,
}

pub fn tract_url(template: &str, fips: &FipsCode) -> String {
    template.replace("{fips}", fips.as_str())
}

pub fn tract_sources(codes: &[FipsCode], layout: &Layout, template: &str) -> Vec<TractSource> {
    codes
        .iter()
        .map(|fips| TractSource {
            fips: fips.clone(),
            url: tract_url(template, fips),
            destination: layout.shapefile_dir(fips),
        })
        .collect()
}

/// Downloads and unpacks one state's tract archive.
pub fn fetch_tracts<D: Downloader + ?Sized>(
    downloader: &D,
    layout: &Layout,
    source: &TractSource,
) -> Result<Utf8PathBuf, CensusError> {
    info!(fips = %source.fips, url = %source.url, destination = %source.destination, "fetching tract shapefile");
    download::download_zip(
        downloader,
        &source.url,
        &layout.downloads_dir(),
        &source.destination,
    )?;
    Ok(source.destination.clone())
}

/// Converts a shapefile into a GeoJSON feature collection.
pub trait GeometryConverter: Send + Sync {
    fn to_geojson(&self, shapefile: &Path, output: &Path) -> Result<(), CensusError>;
}

#[derive(Debug, Clone)]
pub struct Ogr2OgrConverter {
    program: Option<PathBuf>,
}

impl Ogr2OgrConverter {
    pub fn new() -> Self {
        Self {
            program: find_in_path("ogr2ogr"),
        }
    }
}

impl Default for Ogr2OgrConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl GeometryConverter for Ogr2OgrConverter {
    fn to_geojson(&self, shapefile: &Path, output: &Path) -> Result<(), CensusError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| CensusError::MissingTool("ogr2ogr".to_string()))?;
        let output_cmd = Command::new(program)
            .args(["-f", "GeoJSON"])
            .arg(output)
            .arg(shapefile)
            .output()
            .map_err(|err| CensusError::Conversion(err.to_string()))?;
        if output_cmd.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output_cmd.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!(
                "ogr2ogr exited with {} for {}",
                output_cmd.status,
                shapefile.display()
            )
        } else {
            stderr
        };
        Err(CensusError::Conversion(message))
    }
}

/// Produces `geojson/{fips}.json` from the unpacked shapefile unless it is
/// already present. Returns whether a conversion ran.
pub fn convert_tracts<C: GeometryConverter + ?Sized>(
    converter: &C,
    layout: &Layout,
    fips: &FipsCode,
) -> Result<bool, CensusError> {
    let shapefile = layout.path_for(fips, GeoFileType::Shp);
    let geojson = layout.path_for(fips, GeoFileType::GeoJson);
    if geojson.as_std_path().is_file() {
        info!(%fips, %geojson, "GeoJSON already present");
        return Ok(false);
    }
    if !shapefile.as_std_path().is_file() {
        return Err(CensusError::MissingDownload {
            what: "tract shapefile".to_string(),
            path: shapefile.into_std_path_buf(),
        });
    }
    store::ensure_parent(&geojson)?;
    info!(%fips, "transforming shapefile to GeoJSON");
    converter.to_geojson(shapefile.as_std_path(), geojson.as_std_path())?;
    Ok(true)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    for path in std::env::split_paths(&path_var) {
        let exe = path.join(format!("{name}.exe"));
        if exe.exists() {
            return Some(exe);
        }
        let plain = path.join(name);
        if plain.exists() {
            return Some(plain);
        }
    }
    None
}
