use std::collections::HashMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use geojson::{Feature, FeatureCollection, GeoJson, JsonValue};
use serde::Serialize;
use tracing::{error, info};

use crate::domain::{FipsCode, GeoFileType, SkipSet, TRACT_ID_FIELD};
use crate::error::CensusError;
use crate::store::{Layout, write_bytes_atomic};

#[derive(Debug, Clone)]
pub struct JoinSettings {
    pub geometry_key_field: String,
    pub population_key_field: String,
    pub rename_from: String,
    pub rename_to: String,
}

impl JoinSettings {
    pub fn new(geometry_key_field: &str, rename_from: &str, rename_to: &str) -> Self {
        Self {
            geometry_key_field: geometry_key_field.to_string(),
            population_key_field: TRACT_ID_FIELD.to_string(),
            rename_from: rename_from.to_string(),
            rename_to: rename_to.to_string(),
        }
    }
}

/// Per-state population table as read back from disk.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PopulationTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl PopulationTable {
    pub fn read(path: &Utf8Path) -> Result<Self, csv::Error> {
        let mut reader = csv::Reader::from_path(path.as_std_path())?;
        let columns = reader.headers()?.iter().map(str::to_string).collect();
        let rows = reader
            .records()
            .map(|record| record.map(|record| record.iter().map(str::to_string).collect()))
            .collect::<Result<Vec<Vec<String>>, _>>()?;
        Ok(Self { columns, rows })
    }

    pub fn rename_column(&mut self, from: &str, to: &str) {
        for column in self.columns.iter_mut().filter(|column| *column == from) {
            *column = to.to_string();
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    pub geometries: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub output_features: usize,
}

pub struct JoinEngine<'a> {
    layout: &'a Layout,
    skip: &'a SkipSet,
    settings: JoinSettings,
}

impl<'a> JoinEngine<'a> {
    pub fn new(layout: &'a Layout, skip: &'a SkipSet, settings: JoinSettings) -> Self {
        Self {
            layout,
            skip,
            settings,
        }
    }

    /// Joins one state's tract geometries with its population file and
    /// writes the merged collection. Returns `None` for a skipped code.
    pub fn join_state(
        &self,
        fips: &FipsCode,
    ) -> Result<Option<(Utf8PathBuf, JoinStats)>, CensusError> {
        if self.skip.contains(fips) {
            info!(%fips, "skipping join for state/territory");
            return Ok(None);
        }

        let result = self.join_inputs(fips);
        if let Err(err) = &result {
            error!(%fips, "could not join tract geometry with population: {err}");
        }
        let (merged, stats) = result?;

        let path = self.layout.merged_path(fips);
        let content = GeoJson::from(merged).to_string();
        write_bytes_atomic(&path, content.as_bytes())?;
        info!(
            %fips,
            geometries = stats.geometries,
            matched = stats.matched,
            unmatched = stats.unmatched,
            %path,
            "merged dataset written"
        );
        Ok(Some((path, stats)))
    }

    fn join_inputs(&self, fips: &FipsCode) -> Result<(FeatureCollection, JoinStats), CensusError> {
        let input_err = |message: String| CensusError::JoinInput {
            fips: fips.to_string(),
            message,
        };

        let geometry_path = self.layout.path_for(fips, GeoFileType::GeoJson);
        let geometry: FeatureCollection = fs::read_to_string(geometry_path.as_std_path())
            .map_err(|err| input_err(format!("{geometry_path}: {err}")))?
            .parse()
            .map_err(|err| input_err(format!("{geometry_path}: {err}")))?;

        let population_path = self.layout.population_path(fips);
        let mut population = PopulationTable::read(&population_path)
            .map_err(|err| input_err(format!("{population_path}: {err}")))?;
        population.rename_column(&self.settings.rename_from, &self.settings.rename_to);

        left_join(geometry, &population, &self.settings, fips)
    }
}

/// Left joins population rows onto geometry features.
///
/// Keys on both sides are compared as integers. Every feature is kept in
/// input order; a feature without a population match gets every population
/// column set to null, and a feature matching several rows is repeated once
/// per row.
pub fn left_join(
    geometry: FeatureCollection,
    population: &PopulationTable,
    settings: &JoinSettings,
    fips: &FipsCode,
) -> Result<(FeatureCollection, JoinStats), CensusError> {
    let key_index = population
        .column_index(&settings.population_key_field)
        .ok_or_else(|| CensusError::JoinInput {
            fips: fips.to_string(),
            message: format!(
                "population file has no {} column",
                settings.population_key_field
            ),
        })?;

    let mut index: HashMap<i64, Vec<usize>> = HashMap::new();
    for (row_number, row) in population.rows.iter().enumerate() {
        let raw = row.get(key_index).map(String::as_str).unwrap_or_default();
        let key = coerce_key_str(raw).ok_or_else(|| CensusError::JoinKey {
            fips: fips.to_string(),
            source_name: "population".to_string(),
            value: raw.to_string(),
        })?;
        index.entry(key).or_default().push(row_number);
    }

    let mut stats = JoinStats {
        geometries: geometry.features.len(),
        ..JoinStats::default()
    };
    let mut features = Vec::with_capacity(geometry.features.len());
    for feature in geometry.features {
        let key = feature
            .property(&settings.geometry_key_field)
            .and_then(coerce_key_json)
            .ok_or_else(|| CensusError::JoinKey {
                fips: fips.to_string(),
                source_name: "geometry".to_string(),
                value: feature
                    .property(&settings.geometry_key_field)
                    .map(JsonValue::to_string)
                    .unwrap_or_else(|| "<missing>".to_string()),
            })?;

        match index.get(&key) {
            Some(rows) => {
                stats.matched += 1;
                for &row_number in rows {
                    let mut merged = feature.clone();
                    append_population(
                        &mut merged,
                        population,
                        Some(&population.rows[row_number]),
                        key_index,
                    );
                    features.push(merged);
                }
            }
            None => {
                stats.unmatched += 1;
                let mut merged = feature;
                append_population(&mut merged, population, None, key_index);
                features.push(merged);
            }
        }
    }
    stats.output_features = features.len();

    Ok((
        FeatureCollection {
            bbox: geometry.bbox,
            features,
            foreign_members: geometry.foreign_members,
        },
        stats,
    ))
}

fn append_population(
    feature: &mut Feature,
    population: &PopulationTable,
    row: Option<&Vec<String>>,
    key_index: usize,
) {
    for (column_number, column) in population.columns.iter().enumerate() {
        let value = match row.and_then(|row| row.get(column_number)) {
            None => JsonValue::Null,
            Some(raw) if column_number == key_index => JsonValue::String(raw.clone()),
            Some(raw) => population_value(raw),
        };
        feature.set_property(column.as_str(), value);
    }
}

/// Numeric cells become JSON numbers, blanks become null.
pub fn population_value(raw: &str) -> JsonValue {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return JsonValue::Null;
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return JsonValue::from(int);
    }
    match trimmed.parse::<f64>() {
        Ok(float) if float.is_finite() => JsonValue::from(float),
        _ => JsonValue::String(raw.to_string()),
    }
}

pub fn coerce_key_str(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

pub fn coerce_key_json(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::String(raw) => coerce_key_str(raw),
        JsonValue::Number(number) => number.as_i64().or_else(|| {
            number
                .as_f64()
                .filter(|float| float.fract() == 0.0)
                .map(|float| float as i64)
        }),
        _ => None,
    }
}
