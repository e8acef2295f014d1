use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::domain::{SkipSet, default_skip_codes};
use crate::error::CensusError;

pub const CONFIG_FILE_NAME: &str = "census-etl.json";

pub const DEFAULT_FIPS_TABLE_URL: &str =
    "https://www2.census.gov/geo/docs/maps-data/data/geo_tallies2020/2020talliesbystate.xlsx";
pub const DEFAULT_TRACT_URL_TEMPLATE: &str =
    "https://www2.census.gov/geo/tiger/TIGER2010/TRACT/2010/tl_2010_{fips}_tract10.zip";
pub const DEFAULT_SURVEY_BASE_URL: &str = "https://api.census.gov/data";
pub const DEFAULT_SURVEY_DATASET: &str = "acs5";
pub const DEFAULT_SURVEY_VINTAGE: u16 = 2019;
pub const TOTAL_POPULATION_VARIABLE: &str = "B01001_001E";
pub const DEFAULT_TOTAL_POPULATION_LABEL: &str = "total_population";
pub const DEFAULT_GEOMETRY_KEY_FIELD: &str = "GEOID10";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub fips_table_url: Option<String>,
    #[serde(default)]
    pub tract_url_template: Option<String>,
    #[serde(default)]
    pub survey_base_url: Option<String>,
    #[serde(default)]
    pub survey_dataset: Option<String>,
    #[serde(default)]
    pub survey_vintage: Option<u16>,
    #[serde(default)]
    pub variables: Option<VariableSelection>,
    #[serde(default)]
    pub skip: Option<Vec<String>>,
    #[serde(default)]
    pub total_population_variable: Option<String>,
    #[serde(default)]
    pub total_population_label: Option<String>,
    #[serde(default)]
    pub geometry_key_field: Option<String>,
}

/// Either an explicit list of survey variables or the name of a preset.
#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum VariableSelection {
    Preset(String),
    List(Vec<String>),
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub data_dir: Utf8PathBuf,
    pub fips_table_url: String,
    pub tract_url_template: String,
    pub survey: SurveySettings,
    pub skip: SkipSet,
    pub total_population_variable: String,
    pub total_population_label: String,
    pub geometry_key_field: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurveySettings {
    pub base_url: String,
    pub dataset: String,
    pub vintage: u16,
    pub variables: Vec<String>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads an explicit config file, or `census-etl.json` from the working
    /// directory, falling back to the user config dir and then to defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CensusError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => default_config_path(),
        };

        let Some(config_path) = config_path else {
            return Self::resolve_config(Config::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CensusError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CensusError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CensusError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(CensusError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let tract_url_template = config
            .tract_url_template
            .unwrap_or_else(|| DEFAULT_TRACT_URL_TEMPLATE.to_string());
        if !tract_url_template.contains("{fips}") {
            return Err(CensusError::InvalidConfig(
                "tract_url_template must contain a {fips} placeholder".to_string(),
            ));
        }

        let variables = match config.variables {
            None => vec![TOTAL_POPULATION_VARIABLE.to_string()],
            Some(VariableSelection::Preset(name)) => variable_preset(&name)?,
            Some(VariableSelection::List(list)) => list,
        };
        if variables.is_empty() {
            return Err(CensusError::InvalidConfig(
                "at least one survey variable is required".to_string(),
            ));
        }

        Ok(ResolvedConfig {
            schema_version,
            data_dir: Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| "data".to_string())),
            fips_table_url: config
                .fips_table_url
                .unwrap_or_else(|| DEFAULT_FIPS_TABLE_URL.to_string()),
            tract_url_template,
            survey: SurveySettings {
                base_url: config
                    .survey_base_url
                    .unwrap_or_else(|| DEFAULT_SURVEY_BASE_URL.to_string()),
                dataset: config
                    .survey_dataset
                    .unwrap_or_else(|| DEFAULT_SURVEY_DATASET.to_string()),
                vintage: config.survey_vintage.unwrap_or(DEFAULT_SURVEY_VINTAGE),
                variables,
            },
            skip: SkipSet::new(config.skip.unwrap_or_else(default_skip_codes)),
            total_population_variable: config
                .total_population_variable
                .unwrap_or_else(|| TOTAL_POPULATION_VARIABLE.to_string()),
            total_population_label: config
                .total_population_label
                .unwrap_or_else(|| DEFAULT_TOTAL_POPULATION_LABEL.to_string()),
            geometry_key_field: config
                .geometry_key_field
                .unwrap_or_else(|| DEFAULT_GEOMETRY_KEY_FIELD.to_string()),
        })
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from(CONFIG_FILE_NAME);
    if local.exists() {
        return Some(local);
    }
    ProjectDirs::from("", "", "census-etl")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
        .filter(|path| path.exists())
}

pub fn variable_preset(name: &str) -> Result<Vec<String>, CensusError> {
    match name {
        "total" => Ok(vec![TOTAL_POPULATION_VARIABLE.to_string()]),
        "age-sex" => Ok(age_sex_variables()),
        other => Err(CensusError::InvalidConfig(format!(
            "unknown variable preset: {other}"
        ))),
    }
}

/// B01001 estimates by sex and age bucket, male then female.
///
/// `_002E` and `_026E` are the per-sex subtotals and are left out.
pub fn age_sex_variables() -> Vec<String> {
    (3..=25)
        .chain(27..=49)
        .map(|n| format!("B01001_{n:03}E"))
        .collect()
}
