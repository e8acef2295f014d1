use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{FipsCode, GeoFileType};
use crate::download::Downloader;
use crate::error::CensusError;
use crate::geography::{self, GeometryConverter};
use crate::join::{JoinEngine, JoinSettings, JoinStats};
use crate::population::PopulationFetcher;
use crate::reference;
use crate::store::Layout;
use crate::survey::{SurveyClient, api_key_from_env};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Fips,
    Geography,
    Convert,
    Population,
    Join,
}

/// What to do when one identifier fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Stop at the first failure and return it.
    #[default]
    Abort,
    /// Record the failure in the report and move on to the next identifier.
    Continue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed {
        path: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        join: Option<JoinStats>,
    },
    Skipped,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StateOutcome {
    pub fips: FipsCode,
    pub step: Step,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: String,
    pub finished_at: Option<String>,
    pub fips_codes: Vec<FipsCode>,
    pub items: Vec<StateOutcome>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            started_at: iso_timestamp(),
            finished_at: None,
            fips_codes: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn outcomes(&self, step: Step) -> impl Iterator<Item = &StateOutcome> {
        self.items.iter().filter(move |item| item.step == step)
    }

    pub fn failures(&self) -> usize {
        self.items
            .iter()
            .filter(|item| matches!(item.outcome, Outcome::Failed { .. }))
            .count()
    }
}

/// Which steps a run performs. Geography conversion only happens alongside
/// the geography download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub geography: bool,
    pub convert: bool,
    pub population: bool,
    pub join: bool,
}

impl RunPlan {
    pub fn all() -> Self {
        Self {
            geography: true,
            convert: true,
            population: true,
            join: true,
        }
    }

    pub fn only(step: Step) -> Self {
        Self {
            geography: step == Step::Geography,
            convert: step == Step::Geography || step == Step::Convert,
            population: step == Step::Population,
            join: step == Step::Join,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<D: Downloader, S: SurveyClient, C: GeometryConverter> {
    config: ResolvedConfig,
    layout: Layout,
    downloader: D,
    survey: S,
    converter: C,
    policy: FailurePolicy,
    api_key: Option<String>,
}

impl<D: Downloader, S: SurveyClient, C: GeometryConverter> App<D, S, C> {
    pub fn new(config: ResolvedConfig, downloader: D, survey: S, converter: C) -> Self {
        let layout = Layout::new(config.data_dir.clone());
        Self {
            config,
            layout,
            downloader,
            survey,
            converter,
            policy: FailurePolicy::default(),
            api_key: api_key_from_env(),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Downloads the reference spreadsheet and returns its state codes.
    pub fn fetch_fips_codes(&self, sink: &dyn ProgressSink) -> Result<Vec<FipsCode>, CensusError> {
        phase(sink, "phase=Resolve; fetching FIPS reference table");
        let start = Instant::now();
        let codes = reference::fetch_state_codes(
            &self.downloader,
            &self.layout,
            &self.config.fips_table_url,
        )?;
        sink.event(ProgressEvent {
            message: format!("fips.loaded count={}", codes.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(codes)
    }

    /// Runs the planned steps in order: geography, population, join.
    ///
    /// `codes` replaces the reference-table download when given.
    pub fn run(
        &self,
        codes: Option<Vec<FipsCode>>,
        plan: RunPlan,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, CensusError> {
        let mut report = RunReport::new();
        report.fips_codes = match codes {
            Some(codes) => codes,
            None => self.fetch_fips_codes(sink)?,
        };
        let codes = report.fips_codes.clone();

        if plan.geography {
            self.fetch_geography(&codes, sink, &mut report)?;
        }
        if plan.convert {
            self.convert_geography(&codes, sink, &mut report)?;
        }
        if plan.population {
            self.fetch_population(&codes, sink, &mut report)?;
        }
        if plan.join {
            self.join(&codes, sink, &mut report)?;
        }

        report.finished_at = Some(iso_timestamp());
        Ok(report)
    }

    pub fn fetch_geography(
        &self,
        codes: &[FipsCode],
        sink: &dyn ProgressSink,
        report: &mut RunReport,
    ) -> Result<(), CensusError> {
        phase(sink, "phase=Download; tract shapefiles");
        let sources =
            geography::tract_sources(codes, &self.layout, &self.config.tract_url_template);
        for (position, source) in sources.iter().enumerate() {
            progress(sink, Step::Geography, &source.fips, position, sources.len());
            let result = geography::fetch_tracts(&self.downloader, &self.layout, source)
                .map(|path| Outcome::Completed {
                    path: path.to_string(),
                    join: None,
                });
            self.record(report, &source.fips, Step::Geography, result)?;
        }
        Ok(())
    }

    pub fn convert_geography(
        &self,
        codes: &[FipsCode],
        sink: &dyn ProgressSink,
        report: &mut RunReport,
    ) -> Result<(), CensusError> {
        phase(sink, "phase=Transform; shapefile to GeoJSON");
        for (position, fips) in codes.iter().enumerate() {
            progress(sink, Step::Convert, fips, position, codes.len());
            let result = geography::convert_tracts(&self.converter, &self.layout, fips).map(|_| {
                Outcome::Completed {
                    path: self.layout.path_for(fips, GeoFileType::GeoJson).to_string(),
                    join: None,
                }
            });
            self.record(report, fips, Step::Convert, result)?;
        }
        Ok(())
    }

    pub fn fetch_population(
        &self,
        codes: &[FipsCode],
        sink: &dyn ProgressSink,
        report: &mut RunReport,
    ) -> Result<(), CensusError> {
        phase(sink, "phase=Download; survey population estimates");
        let fetcher = PopulationFetcher::new(
            &self.survey,
            &self.layout,
            &self.config.survey,
            &self.config.skip,
            self.api_key.clone(),
        );
        for (position, fips) in codes.iter().enumerate() {
            progress(sink, Step::Population, fips, position, codes.len());
            let result = fetcher.fetch_state(fips).map(|path| match path {
                Some(path) => Outcome::Completed {
                    path: path.to_string(),
                    join: None,
                },
                None => Outcome::Skipped,
            });
            self.record(report, fips, Step::Population, result)?;
        }
        Ok(())
    }

    pub fn join(
        &self,
        codes: &[FipsCode],
        sink: &dyn ProgressSink,
        report: &mut RunReport,
    ) -> Result<(), CensusError> {
        phase(sink, "phase=Join; tract geometry with population");
        let engine = JoinEngine::new(
            &self.layout,
            &self.config.skip,
            JoinSettings::new(
                &self.config.geometry_key_field,
                &self.config.total_population_variable,
                &self.config.total_population_label,
            ),
        );
        for (position, fips) in codes.iter().enumerate() {
            progress(sink, Step::Join, fips, position, codes.len());
            let result = engine.join_state(fips).map(|joined| match joined {
                Some((path, stats)) => Outcome::Completed {
                    path: path.to_string(),
                    join: Some(stats),
                },
                None => Outcome::Skipped,
            });
            self.record(report, fips, Step::Join, result)?;
        }
        Ok(())
    }

    fn record(
        &self,
        report: &mut RunReport,
        fips: &FipsCode,
        step: Step,
        result: Result<Outcome, CensusError>,
    ) -> Result<(), CensusError> {
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(err) if self.policy == FailurePolicy::Continue => {
                tracing::warn!(%fips, ?step, "continuing after failure: {err}");
                Outcome::Failed {
                    reason: err.to_string(),
                }
            }
            Err(err) => return Err(err),
        };
        report.items.push(StateOutcome {
            fips: fips.clone(),
            step,
            outcome,
        });
        Ok(())
    }
}

fn phase(sink: &dyn ProgressSink, message: &str) {
    sink.event(ProgressEvent {
        message: message.to_string(),
        elapsed: None,
    });
}

fn progress(sink: &dyn ProgressSink, step: Step, fips: &FipsCode, position: usize, total: usize) {
    sink.event(ProgressEvent {
        message: format!("{step:?} FIPS {fips} ({} of {total})", position + 1),
        elapsed: None,
    });
}

fn iso_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}
