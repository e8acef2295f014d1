use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use zip::write::SimpleFileOptions;

use census_tract_etl::domain::{FipsCode, GeoFileType};
use census_tract_etl::download::Downloader;
use census_tract_etl::error::CensusError;
use census_tract_etl::geography::{
    GeometryConverter, convert_tracts, fetch_tracts, tract_sources,
};
use census_tract_etl::store::Layout;

/// Serves a small tract archive for every URL.
#[derive(Default)]
struct ZipDownloader {
    urls: Mutex<Vec<String>>,
}

impl Downloader for ZipDownloader {
    fn download_file(&self, url: &str, destination: &Path) -> Result<(), CensusError> {
        self.urls.lock().unwrap().push(url.to_string());
        let file = fs::File::create(destination).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("tl_2010_01_tract10.shp", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"shape").unwrap();
        writer
            .start_file("tl_2010_01_tract10.dbf", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"table").unwrap();
        writer.finish().unwrap();
        Ok(())
    }
}

#[derive(Default)]
struct CopyConverter {
    calls: Mutex<usize>,
}

impl GeometryConverter for CopyConverter {
    fn to_geojson(&self, _shapefile: &Path, output: &Path) -> Result<(), CensusError> {
        *self.calls.lock().unwrap() += 1;
        fs::write(output, r#"{"type":"FeatureCollection","features":[]}"#).unwrap();
        Ok(())
    }
}

fn layout(root: &Path) -> Layout {
    Layout::new(Utf8PathBuf::from_path_buf(root.to_path_buf()).unwrap())
}

#[test]
fn fetch_unpacks_archive_and_cleans_scratch() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout(temp.path());
    let downloader = ZipDownloader::default();
    let fips = FipsCode::from("01");
    let sources = tract_sources(
        std::slice::from_ref(&fips),
        &layout,
        "https://example.org/tl_2010_{fips}_tract10.zip",
    );

    let dir = fetch_tracts(&downloader, &layout, &sources[0]).unwrap();

    assert_eq!(dir, layout.shapefile_dir(&fips));
    assert!(layout.path_for(&fips, GeoFileType::Shp).as_std_path().is_file());
    assert_eq!(
        downloader.urls.lock().unwrap().as_slice(),
        ["https://example.org/tl_2010_01_tract10.zip"]
    );
    let scratch_entries = fs::read_dir(layout.downloads_dir().as_std_path())
        .unwrap()
        .count();
    assert_eq!(scratch_entries, 0);
}

#[test]
fn conversion_runs_once() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout(temp.path());
    let downloader = ZipDownloader::default();
    let converter = CopyConverter::default();
    let fips = FipsCode::from("01");
    let sources = tract_sources(
        std::slice::from_ref(&fips),
        &layout,
        "https://example.org/tl_2010_{fips}_tract10.zip",
    );
    fetch_tracts(&downloader, &layout, &sources[0]).unwrap();

    assert!(convert_tracts(&converter, &layout, &fips).unwrap());
    assert!(!convert_tracts(&converter, &layout, &fips).unwrap());
    assert_eq!(*converter.calls.lock().unwrap(), 1);
    assert!(layout.path_for(&fips, GeoFileType::GeoJson).as_std_path().is_file());
}

#[test]
fn conversion_without_shapefile_is_missing_download() {
    let temp = tempfile::tempdir().unwrap();
    let layout = layout(temp.path());
    let converter = CopyConverter::default();

    let err = convert_tracts(&converter, &layout, &FipsCode::from("02")).unwrap_err();
    assert!(matches!(err, CensusError::MissingDownload { .. }));
    assert_eq!(*converter.calls.lock().unwrap(), 0);
}
