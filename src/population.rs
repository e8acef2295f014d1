use camino::Utf8PathBuf;
use csv::WriterBuilder;
use tracing::{error, info};

use crate::config::SurveySettings;
use crate::domain::{FipsCode, SkipSet, TRACT_ID_FIELD};
use crate::error::CensusError;
use crate::store::{Layout, write_bytes_atomic};
use crate::survey::{SurveyClient, SurveyQuery, SurveyTable};

/// Retrieves tract-level estimates for one state at a time and writes them as
/// `acs_census_data_state_{fips}.csv`.
pub struct PopulationFetcher<'a, S: SurveyClient + ?Sized> {
    client: &'a S,
    layout: &'a Layout,
    settings: &'a SurveySettings,
    skip: &'a SkipSet,
    api_key: Option<String>,
}

impl<'a, S: SurveyClient + ?Sized> PopulationFetcher<'a, S> {
    pub fn new(
        client: &'a S,
        layout: &'a Layout,
        settings: &'a SurveySettings,
        skip: &'a SkipSet,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            layout,
            settings,
            skip,
            api_key,
        }
    }

    /// Returns the written path, or `None` for a skipped code.
    pub fn fetch_state(&self, fips: &FipsCode) -> Result<Option<Utf8PathBuf>, CensusError> {
        if self.skip.contains(fips) {
            info!(%fips, "skipping download for state/territory");
            return Ok(None);
        }

        let key_note = if self.api_key.is_some() {
            "with API key"
        } else {
            "without API key"
        };
        info!(%fips, "downloading data for state/territory {key_note}");

        let query = SurveyQuery {
            dataset: self.settings.dataset.clone(),
            vintage: self.settings.vintage,
            variables: self.settings.variables.clone(),
            state: fips.clone(),
            key: self.api_key.clone(),
        };
        let table = self.client.download(&query).inspect_err(|err| {
            error!(%fips, "could not download data for state/territory: {err}");
        })?;

        let path = self.layout.population_path(fips);
        let content = population_csv(&table)?;
        write_bytes_atomic(&path, &content)?;
        info!(%fips, rows = table.rows.len(), %path, "population written");
        Ok(Some(path))
    }
}

/// Renders the table with the requested variables followed by the flat
/// tract identifier column. There is no index column.
pub fn population_csv(table: &SurveyTable) -> Result<Vec<u8>, CensusError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let mut header: Vec<&str> = table.variables.iter().map(String::as_str).collect();
    header.push(TRACT_ID_FIELD);
    writer
        .write_record(&header)
        .map_err(|err| CensusError::PopulationCsv(err.to_string()))?;

    for row in &table.rows {
        let tract_id = row.geo.tract_id();
        let record = row
            .values
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(tract_id.as_str()));
        writer
            .write_record(record)
            .map_err(|err| CensusError::PopulationCsv(err.to_string()))?;
    }

    writer
        .into_inner()
        .map_err(|err| CensusError::PopulationCsv(err.to_string()))
}
