use std::fs;
use std::path::Path;
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;
use geojson::{Feature, FeatureCollection, JsonValue};

use census_tract_etl::app::{App, FailurePolicy, Outcome, RunPlan, Step};
use census_tract_etl::config::{Config, ConfigLoader};
use census_tract_etl::domain::{FipsCode, GeoFileType, GeoKey};
use census_tract_etl::download::Downloader;
use census_tract_etl::error::CensusError;
use census_tract_etl::geography::GeometryConverter;
use census_tract_etl::output::JsonOutput;
use census_tract_etl::survey::{SurveyClient, SurveyQuery, SurveyRow, SurveyTable};

struct MockDownloader;

impl Downloader for MockDownloader {
    fn download_file(&self, url: &str, _destination: &Path) -> Result<(), CensusError> {
        Err(CensusError::FetchStatus {
            url: url.to_string(),
            status: 404,
            message: "not mocked".to_string(),
        })
    }
}

#[derive(Default)]
struct MockSurvey {
    calls: Mutex<Vec<String>>,
}

impl MockSurvey {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn tract_row(state: &str, tract: &str, total: &str) -> SurveyRow {
    let geo: GeoKey = [("state", state), ("county", "001"), ("tract", tract)]
        .into_iter()
        .collect();
    SurveyRow {
        geo,
        values: vec![total.to_string()],
    }
}

impl SurveyClient for &MockSurvey {
    fn download(&self, query: &SurveyQuery) -> Result<SurveyTable, CensusError> {
        self.calls.lock().unwrap().push(query.state.to_string());
        match query.state.as_str() {
            "36" => Err(CensusError::SurveyRejected {
                fips: "36".to_string(),
                status: 400,
                message: "error: unknown variable 'B01001_001E'".to_string(),
            }),
            "02" => Ok(SurveyTable::empty(&query.variables)),
            state => Ok(SurveyTable {
                variables: query.variables.clone(),
                rows: vec![
                    tract_row(state, "020100", "1775"),
                    tract_row(state, "020200", "2034"),
                ],
            }),
        }
    }
}

struct NoConverter;

impl GeometryConverter for NoConverter {
    fn to_geojson(&self, _shapefile: &Path, _output: &Path) -> Result<(), CensusError> {
        Err(CensusError::MissingTool("ogr2ogr".to_string()))
    }
}

fn codes(values: &[&str]) -> Vec<FipsCode> {
    values.iter().map(|value| FipsCode::from(*value)).collect()
}

fn app<'a>(root: &Path, survey: &'a MockSurvey) -> App<MockDownloader, &'a MockSurvey, NoConverter> {
    let config = Config {
        data_dir: Some(root.to_string_lossy().to_string()),
        ..Config::default()
    };
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    App::new(resolved, MockDownloader, survey, NoConverter).with_api_key(None)
}

fn population_only() -> RunPlan {
    RunPlan::only(Step::Population)
}

fn write_tracts(app: &App<MockDownloader, &MockSurvey, NoConverter>, fips: &str, geoids: &[&str]) {
    let collection: FeatureCollection = geoids
        .iter()
        .map(|geoid| {
            let mut feature = Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::Point(vec![
                    -86.5, 32.4,
                ]))),
                id: None,
                properties: None,
                foreign_members: None,
            };
            feature.set_property("GEOID10", *geoid);
            feature
        })
        .collect();
    let path = app.layout().path_for(&fips.into(), GeoFileType::GeoJson);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, geojson::GeoJson::from(collection).to_string()).unwrap();
}

#[test]
fn skipped_codes_are_not_queried() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);

    let report = app
        .run(Some(codes(&["01", "60"])), population_only(), &JsonOutput)
        .unwrap();

    assert_eq!(survey.calls(), vec!["01"]);
    assert!(app.layout().population_path(&"01".into()).as_std_path().is_file());
    assert!(!app.layout().population_path(&"60".into()).as_std_path().exists());
    let outcomes: Vec<_> = report.outcomes(Step::Population).collect();
    assert_matches!(outcomes[0].outcome, Outcome::Completed { .. });
    assert_eq!(outcomes[1].outcome, Outcome::Skipped);
}

#[test]
fn population_file_has_flat_tract_ids() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);

    app.run(Some(codes(&["06"])), population_only(), &JsonOutput)
        .unwrap();

    let content = fs::read_to_string(app.layout().population_path(&"06".into())).unwrap();
    assert_eq!(
        content,
        "B01001_001E,GEOID10_TRACT\n1775,06001020100\n2034,06001020200\n"
    );
}

#[test]
fn zero_tract_state_writes_header_only() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);

    app.run(Some(codes(&["02"])), population_only(), &JsonOutput)
        .unwrap();

    let content = fs::read_to_string(app.layout().population_path(&"02".into())).unwrap();
    assert_eq!(content, "B01001_001E,GEOID10_TRACT\n");
}

#[test]
fn rerun_rewrites_identical_bytes() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);
    let path = app.layout().population_path(&"01".into());

    app.run(Some(codes(&["01"])), population_only(), &JsonOutput)
        .unwrap();
    let first = fs::read(&path).unwrap();
    app.run(Some(codes(&["01"])), population_only(), &JsonOutput)
        .unwrap();
    let second = fs::read(&path).unwrap();

    assert_eq!(first, second);
    assert_eq!(survey.calls(), vec!["01", "01"]);
}

#[test]
fn api_rejection_aborts_the_run() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);

    let err = app
        .run(Some(codes(&["01", "36", "06"])), population_only(), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, CensusError::SurveyRejected { ref fips, .. } if fips == "36");
    assert_eq!(survey.calls(), vec!["01", "36"]);
    assert!(app.layout().population_path(&"01".into()).as_std_path().is_file());
    assert!(!app.layout().population_path(&"36".into()).as_std_path().exists());
    assert!(!app.layout().population_path(&"06".into()).as_std_path().exists());
}

#[test]
fn keep_going_records_failure_and_continues() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey).with_policy(FailurePolicy::Continue);

    let report = app
        .run(Some(codes(&["01", "36", "06"])), population_only(), &JsonOutput)
        .unwrap();

    assert_eq!(survey.calls(), vec!["01", "36", "06"]);
    assert_eq!(report.failures(), 1);
    assert_matches!(report.items[1].outcome, Outcome::Failed { ref reason } if reason.contains("36"));
    assert!(app.layout().population_path(&"06".into()).as_std_path().is_file());
}

#[test]
fn end_to_end_population_and_join() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);
    write_tracts(&app, "01", &["01001020100", "01001020200", "01001020300"]);

    let plan = RunPlan {
        population: true,
        join: true,
        ..RunPlan::only(Step::Fips)
    };
    let report = app
        .run(Some(codes(&["01", "60"])), plan, &JsonOutput)
        .unwrap();

    let joins: Vec<_> = report.outcomes(Step::Join).collect();
    assert_eq!(joins.len(), 2);
    assert_eq!(joins[1].outcome, Outcome::Skipped);
    let Outcome::Completed { join: Some(stats), .. } = &joins[0].outcome else {
        panic!("expected completed join, got {:?}", joins[0].outcome);
    };
    assert_eq!(stats.matched, 2);
    assert_eq!(stats.unmatched, 1);

    let merged_path = app.layout().merged_path(&"01".into());
    let merged: FeatureCollection = fs::read_to_string(&merged_path).unwrap().parse().unwrap();
    assert_eq!(merged.features.len(), 3);
    assert_eq!(
        merged.features[0].property("total_population"),
        Some(&JsonValue::from(1775))
    );
    assert_eq!(
        merged.features[2].property("total_population"),
        Some(&JsonValue::Null)
    );
    assert_eq!(
        merged.features[1].property("GEOID10"),
        Some(&JsonValue::from("01001020200"))
    );
    assert!(!app.layout().merged_path(&"60".into()).as_std_path().exists());
}

#[test]
fn missing_join_input_aborts() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);

    let err = app
        .run(Some(codes(&["01", "06"])), RunPlan::only(Step::Join), &JsonOutput)
        .unwrap_err();

    assert_matches!(err, CensusError::JoinInput { ref fips, .. } if fips == "01");
    let merged_dir = Utf8PathBuf::from_path_buf(temp.path().join("census").join("merged")).unwrap();
    assert!(!merged_dir.as_std_path().exists());
}

#[test]
fn missing_reference_table_is_fatal() {
    let temp = tempfile::tempdir().unwrap();
    let survey = MockSurvey::default();
    let app = app(temp.path(), &survey);

    let err = app.run(None, population_only(), &JsonOutput).unwrap_err();

    assert_matches!(err, CensusError::FetchStatus { status: 404, .. });
    assert!(survey.calls().is_empty());
}
