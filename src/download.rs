use std::fs::File;
use std::path::Path;
use std::time::Duration;

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::info;

use crate::error::CensusError;
use crate::fs_util;
use crate::store::atomic_rename_dir;

/// Fixed timeout for plain file downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

pub trait Downloader: Send + Sync {
    /// Writes the body of a successful GET to `destination`, creating parent
    /// directories as needed.
    fn download_file(&self, url: &str, destination: &Path) -> Result<(), CensusError>;
}

#[derive(Clone)]
pub struct HttpDownloader {
    client: Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self, CensusError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("census-etl/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CensusError::FetchHttp {
                    url: String::new(),
                    message: err.to_string(),
                })?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|err| CensusError::FetchHttp {
                url: String::new(),
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }

    fn write_response_to_file(
        &self,
        url: &str,
        mut response: reqwest::blocking::Response,
        destination: &Path,
    ) -> Result<(), CensusError> {
        if response.status() != reqwest::StatusCode::OK {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "request failed".to_string());
            return Err(CensusError::FetchStatus {
                url: url.to_string(),
                status,
                message,
            });
        }
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| CensusError::Filesystem(err.to_string()))?;
        }
        let mut file =
            File::create(destination).map_err(|err| CensusError::Filesystem(err.to_string()))?;
        std::io::copy(&mut response, &mut file)
            .map_err(|err| CensusError::Filesystem(err.to_string()))?;
        Ok(())
    }
}

impl Downloader for HttpDownloader {
    fn download_file(&self, url: &str, destination: &Path) -> Result<(), CensusError> {
        info!(url, "downloading file");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CensusError::FetchHttp {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        self.write_response_to_file(url, response, destination)?;
        info!(path = %destination.display(), "file downloaded");
        Ok(())
    }
}

/// Downloads a zip archive into a scratch directory under `scratch_root`,
/// validates it and moves the extracted tree to `target_dir`.
///
/// The scratch directory is removed whether or not extraction succeeds.
pub fn download_zip<D: Downloader + ?Sized>(
    downloader: &D,
    url: &str,
    scratch_root: &Utf8Path,
    target_dir: &Utf8Path,
) -> Result<usize, CensusError> {
    std::fs::create_dir_all(scratch_root.as_std_path())
        .map_err(|err| CensusError::Filesystem(format!("create {scratch_root}: {err}")))?;
    let scratch = tempfile::Builder::new()
        .prefix("census-etl-zip")
        .tempdir_in(scratch_root.as_std_path())
        .map_err(|err| CensusError::Filesystem(err.to_string()))?;
    let zip_path = scratch.path().join("download.zip");

    downloader.download_file(url, &zip_path)?;
    if !zip_path.exists() {
        return Err(CensusError::MissingDownload {
            what: "zip archive".to_string(),
            path: zip_path,
        });
    }

    fs_util::validate_zip(&zip_path)?;
    let extract_dir = scratch.path().join("extract");
    std::fs::create_dir_all(&extract_dir)
        .map_err(|err| CensusError::Filesystem(err.to_string()))?;
    let files = fs_util::extract_zip(&zip_path, &extract_dir)?;

    let extract_dir = camino::Utf8PathBuf::from_path_buf(extract_dir)
        .map_err(|_| CensusError::Filesystem("non-utf8 scratch path".to_string()))?;
    atomic_rename_dir(&extract_dir, target_dir)?;
    info!(%target_dir, files, "archive extracted");
    Ok(files)
}
