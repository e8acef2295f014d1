use std::path::Path;

use calamine::{Data, Range, Reader, open_workbook_auto};
use tracing::info;

use crate::domain::{FipsCode, MISSING_SENTINEL};
use crate::download::Downloader;
use crate::error::CensusError;
use crate::store::Layout;

pub const STATE_CODE_COLUMN: &str = "STATEFP";

/// Downloads the reference spreadsheet and reads its state codes.
pub fn fetch_state_codes<D: Downloader + ?Sized>(
    downloader: &D,
    layout: &Layout,
    url: &str,
) -> Result<Vec<FipsCode>, CensusError> {
    let path = layout.fips_table_path();
    info!(url, "fetching FIPS codes");
    downloader.download_file(url, path.as_std_path())?;

    if !path.as_std_path().is_file() {
        return Err(CensusError::MissingDownload {
            what: "FIPS spreadsheet".to_string(),
            path: path.into_std_path_buf(),
        });
    }
    load_state_codes(path.as_std_path())
}

pub fn load_state_codes(path: &Path) -> Result<Vec<FipsCode>, CensusError> {
    info!(path = %path.display(), "reading FIPS codes");
    let spreadsheet_err = |message: String| CensusError::Spreadsheet {
        path: path.to_path_buf(),
        message,
    };

    let mut workbook = open_workbook_auto(path).map_err(|err| spreadsheet_err(err.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| spreadsheet_err("workbook has no worksheets".to_string()))?
        .map_err(|err| spreadsheet_err(err.to_string()))?;

    let codes = state_codes_from_range(&range).ok_or_else(|| CensusError::MissingColumn {
        column: STATE_CODE_COLUMN.to_string(),
        path: path.to_path_buf(),
    })?;
    info!(count = codes.len(), "FIPS codes loaded");
    Ok(codes)
}

/// Reads the `STATEFP` column below its header row.
///
/// Returns `None` when no header cell names the column. Order and
/// duplicates are preserved; blank and `nan` cells are dropped.
pub fn state_codes_from_range(range: &Range<Data>) -> Option<Vec<FipsCode>> {
    let mut rows = range.rows();
    let header = rows.next()?;
    let column = header
        .iter()
        .position(|cell| cell_text(cell).as_deref() == Some(STATE_CODE_COLUMN))?;

    Some(
        rows.filter_map(|row| row.get(column))
            .filter_map(cell_text)
            .filter(|value| value != MISSING_SENTINEL)
            .map(FipsCode::new)
            .collect(),
    )
}

fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty => None,
        Data::String(value) => Some(value.clone()),
        Data::Float(value) if value.is_nan() => None,
        Data::Float(value) if value.fract() == 0.0 => Some(format!("{}", *value as i64)),
        other => Some(other.to_string()),
    }
}
