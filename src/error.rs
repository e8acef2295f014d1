use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CensusError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("request to {url} failed: {message}")]
    FetchHttp { url: String, message: String },

    #[error("HTTP response {status} from URL {url}. Info: {message}")]
    FetchStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("{what} not found at path {path}")]
    #[diagnostic(help("the download step should have produced this file"))]
    MissingDownload { what: String, path: PathBuf },

    #[error("failed to read spreadsheet {path}: {message}")]
    Spreadsheet { path: PathBuf, message: String },

    #[error("column {column} not found in spreadsheet {path}")]
    MissingColumn { column: String, path: PathBuf },

    #[error("survey API request failed: {0}")]
    SurveyHttp(String),

    #[error("survey API rejected the request for FIPS code {fips} (status {status}): {message}")]
    SurveyRejected {
        fips: String,
        status: u16,
        message: String,
    },

    #[error("malformed survey API response: {0}")]
    SurveyResponse(String),

    #[error("failed to encode population CSV: {0}")]
    PopulationCsv(String),

    #[error("join input for FIPS code {fips} is missing or unreadable: {message}")]
    JoinInput { fips: String, message: String },

    #[error("join key {value:?} in {source_name} for FIPS code {fips} is not an integer")]
    JoinKey {
        fips: String,
        source_name: String,
        value: String,
    },

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("geometry conversion failed: {0}")]
    Conversion(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
