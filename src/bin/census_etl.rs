use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use census_tract_etl::app::{App, FailurePolicy, ProgressSink, RunPlan, Step};
use census_tract_etl::config::ConfigLoader;
use census_tract_etl::domain::FipsCode;
use census_tract_etl::download::HttpDownloader;
use census_tract_etl::error::CensusError;
use census_tract_etl::geography::Ogr2OgrConverter;
use census_tract_etl::output::{JsonOutput, LogSink, OutputMode};
use census_tract_etl::survey::CensusHttpClient;

#[derive(Parser)]
#[command(name = "census-etl")]
#[command(about = "Assemble US census tract geometry and population estimates per state")]
#[command(version, author)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    #[arg(long, global = true, help = "Path to census-etl.json")]
    config: Option<String>,

    #[arg(long, global = true, help = "Override the data directory")]
    data_dir: Option<String>,

    #[arg(
        long,
        global = true,
        value_delimiter = ',',
        help = "Process these FIPS codes instead of downloading the reference table"
    )]
    fips: Option<Vec<String>>,

    #[arg(long, global = true, help = "Record per-state failures and continue")]
    keep_going: bool,

    #[arg(long, global = true, help = "Print the run report as JSON on stdout")]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the FIPS reference table and list its codes")]
    Fips,
    #[command(about = "Download tract shapefiles and convert them to GeoJSON")]
    Geography(GeographyArgs),
    #[command(about = "Convert already downloaded shapefiles to GeoJSON")]
    Convert,
    #[command(about = "Download survey population estimates per state")]
    Population,
    #[command(about = "Left join tract geometry with population per state")]
    Join,
    #[command(about = "Run every step in order")]
    Run,
}

#[derive(Args)]
struct GeographyArgs {
    #[arg(long, help = "Skip the ogr2ogr conversion")]
    no_convert: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<CensusError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CensusError) -> u8 {
    match error {
        CensusError::ConfigRead(_)
        | CensusError::ConfigParse(_)
        | CensusError::InvalidConfig(_)
        | CensusError::MissingDownload { .. }
        | CensusError::JoinInput { .. } => 2,
        CensusError::FetchHttp { .. }
        | CensusError::FetchStatus { .. }
        | CensusError::SurveyHttp(_)
        | CensusError::SurveyRejected { .. }
        | CensusError::MissingTool(_)
        | CensusError::Conversion(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let GlobalArgs {
        config,
        data_dir,
        fips,
        keep_going,
        json,
    } = cli.global;

    let mut resolved = ConfigLoader::resolve(config.as_deref())?;
    if let Some(data_dir) = data_dir {
        resolved.data_dir = data_dir.into();
    }
    let output_mode = if json {
        OutputMode::Json
    } else {
        OutputMode::Log
    };
    let policy = if keep_going {
        FailurePolicy::Continue
    } else {
        FailurePolicy::Abort
    };
    let codes = fips.map(|codes| codes.into_iter().map(FipsCode::new).collect::<Vec<_>>());

    let plan = match cli.command {
        Commands::Fips => RunPlan::only(Step::Fips),
        Commands::Geography(args) => RunPlan {
            convert: !args.no_convert,
            ..RunPlan::only(Step::Geography)
        },
        Commands::Convert => RunPlan::only(Step::Convert),
        Commands::Population => RunPlan::only(Step::Population),
        Commands::Join => RunPlan::only(Step::Join),
        Commands::Run => RunPlan::all(),
    };

    let downloader = HttpDownloader::new()?;
    let survey = CensusHttpClient::new(&resolved.survey.base_url)?;
    let app = App::new(resolved, downloader, survey, Ogr2OgrConverter::new()).with_policy(policy);

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Log => &LogSink,
    };
    let report = app.run(codes, plan, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Log => {
            if plan == RunPlan::only(Step::Fips) {
                for code in &report.fips_codes {
                    println!("{code}");
                }
            }
            LogSink::summarize(&report);
        }
    }
    Ok(())
}
