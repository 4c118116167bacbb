#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use crossgen::artifact::ArtifactHandle;
use crossgen::config::EvalConfig;
use crossgen::coverage::{OverlapFile, OverlapRecord};
use crossgen::pipeline::{
    FileArtifacts, PipelineError, coverage_stage, matrix_stage, normalize_stage, run_all,
    score_stage, significance_stage,
};
use crossgen::store::PredictionStore;

#[derive(Parser)]
#[command(
    name = "crossgen",
    version,
    about = "Cross-dataset generalization analysis of drug response predictions"
)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct CommonArgs {
    /// TOML run configuration; omitted fields take their defaults
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory of {source}_{target}_split_{id}_{model}.csv files (overrides input.predictions_dir)
    #[arg(long, global = true, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Root directory for every artifact (overrides output.root)
    #[arg(long, global = true, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Fail instead of writing undefined cells when an expected prediction file is absent
    #[arg(long, global = true)]
    strict_missing: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every prediction file and write scores.csv and missing.csv
    Scores,
    /// Build one G matrix per (model, metric) from scores.csv
    Matrices,
    /// Derive Gn, Ga, Gna and the per-model summary from the G matrices
    Normalize,
    /// Compare every model pair on every cell with paired Wilcoxon tests
    Significance,
    /// Correlate drug and cell-line overlap with G and Gn
    Coverage {
        /// CSV with source,target,shared_drugs,shared_cells,target_drugs,target_cells
        #[arg(long, value_name = "FILE")]
        overlaps: PathBuf,
    },
    /// Run every stage in order
    Run {
        /// Overlap counts; coverage correlation is skipped without them
        #[arg(long, value_name = "FILE")]
        overlaps: Option<PathBuf>,
    },
}

fn resolve_config(common: &CommonArgs) -> Result<EvalConfig, PipelineError> {
    let mut config = match &common.config {
        Some(path) => EvalConfig::load(path)?,
        None => EvalConfig::default(),
    };
    if let Some(input) = &common.input {
        config.input.predictions_dir = input.clone();
    }
    if let Some(output) = &common.output {
        config.output.root = output.clone();
    }
    if common.strict_missing {
        config.strict_missing = true;
    }
    config.validate()?;
    Ok(config)
}

fn execute(common: &CommonArgs, command: Commands) -> Result<(), PipelineError> {
    let config = resolve_config(common)?;
    let files = FileArtifacts::new(&config.layout());
    let artifacts = files.handles();
    let store = PredictionStore::new(&config.input).with_progress(true);

    match command {
        Commands::Scores => {
            score_stage(&config, &store, artifacts.scores, artifacts.missing)?;
        }
        Commands::Matrices => {
            matrix_stage(artifacts.scores, artifacts.matrices)?;
        }
        Commands::Normalize => {
            normalize_stage(artifacts.matrices, artifacts.normalized)?;
        }
        Commands::Significance => {
            significance_stage(&config.significance, artifacts.scores, artifacts.significance)?;
        }
        Commands::Coverage { overlaps } => {
            let overlaps = OverlapFile::new(overlaps);
            coverage_stage(
                artifacts.matrices,
                artifacts.normalized,
                &overlaps,
                artifacts.coverage,
            )?;
        }
        Commands::Run { overlaps } => {
            let overlaps = overlaps.map(OverlapFile::new);
            let overlaps = overlaps
                .as_ref()
                .map(|file| file as &dyn ArtifactHandle<Vec<OverlapRecord>>);
            run_all(&config, &store, artifacts, overlaps)?;
        }
    }
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { common, command } = Cli::parse();
    let Some(command) = command else {
        if Cli::command().print_help().is_err() {
            process::exit(2);
        }
        println!();
        return;
    };

    if let Err(e) = execute(&common, command) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
