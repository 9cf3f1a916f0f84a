//! # boostune
//!
//! Run the hyperparameter search against an existing study, or manage the
//! study store and data bundle it depends on.

use anyhow::{Context, Result};
use bt_data::DatasetBundle;
use bt_optimizer::{
    open_storage, FailurePolicy, NopPruner, ObjectiveDirection, RandomSampler, Study,
};
use bt_tuner::{SearchDriver, TunerConfig, COMPLETION_MESSAGE};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "boostune")]
#[command(about = "Boosted-tree hyperparameter search", long_about = None)]
struct Cli {
    /// Dataset bundle (.npz)
    #[arg(long, env = "BOOSTUNE_DATA", default_value = bt_tuner::config::DEFAULT_DATA_PATH, global = true)]
    data: PathBuf,

    /// Study storage URL (duckdb://<path>, duckdb://:memory:, memory://)
    #[arg(long, env = "BOOSTUNE_STORAGE", default_value = bt_tuner::config::DEFAULT_STORAGE_URL, global = true)]
    storage: String,

    /// Study name
    #[arg(long, env = "BOOSTUNE_STUDY", default_value = bt_tuner::config::DEFAULT_STUDY_NAME, global = true)]
    study: String,

    /// Stop once the study-wide trial number reaches this value
    #[arg(long = "n_trials", default_value_t = bt_tuner::config::DEFAULT_N_TRIALS)]
    n_trials: usize,

    /// Early-stopping patience in boosting rounds
    #[arg(long, default_value_t = bt_tuner::config::DEFAULT_EARLY_STOPPING_ROUNDS)]
    early_stopping_rounds: usize,

    /// Seed for the sampler and the booster
    #[arg(long)]
    seed: Option<u64>,

    /// Load the bundle once instead of once per trial
    #[arg(long)]
    reuse_data: bool,

    /// Record failed trials and keep going instead of aborting
    #[arg(long)]
    continue_on_error: bool,

    /// Do not draw the progress bar
    #[arg(long)]
    no_progress: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the study the search attaches to
    CreateStudy {
        /// Optimization direction (maximize, minimize)
        #[arg(long, default_value = "maximize")]
        direction: ObjectiveDirection,
    },

    /// Print the best completed trial as JSON
    BestTrial,

    /// Write a synthetic dataset bundle for smoke runs
    MakeSynthetic {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Total rows across all splits
        #[arg(long, default_value_t = 2000)]
        rows: usize,

        /// Feature columns
        #[arg(long, default_value_t = 8)]
        features: usize,

        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

impl Cli {
    fn tuner_config(&self) -> TunerConfig {
        let policy = if self.continue_on_error {
            FailurePolicy::Continue
        } else {
            FailurePolicy::Abort
        };
        let config = TunerConfig::new()
            .with_data_path(self.data.clone())
            .with_storage_url(self.storage.clone())
            .with_study_name(self.study.clone())
            .with_n_trials(self.n_trials)
            .with_early_stopping_rounds(self.early_stopping_rounds)
            .with_failure_policy(policy)
            .with_reuse_data(self.reuse_data)
            .with_progress(!self.no_progress);
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boostune=info,bt_tuner=info,bt_optimizer=info".into()),
        )
        .init();

    let cli = Cli::parse();
    match &cli.command {
        None => search(&cli, &mut std::io::stdout()),
        Some(Commands::CreateStudy { direction }) => create_study(&cli, *direction),
        Some(Commands::BestTrial) => best_trial(&cli),
        Some(Commands::MakeSynthetic {
            output,
            rows,
            features,
            seed,
        }) => make_synthetic(output, *rows, *features, *seed),
    }
}

fn search(cli: &Cli, out: &mut impl Write) -> Result<()> {
    let driver = SearchDriver::new(cli.tuner_config());
    let summary = driver
        .run()
        .with_context(|| format!("search over study {} in {} failed", cli.study, cli.storage))?;

    match &summary.best_trial {
        Some(best) => info!(
            "Ran {} trials; best is trial {} with value {}",
            summary.trials_run,
            best.number,
            best.value.unwrap_or(f64::NAN)
        ),
        None => info!("Ran {} trials; no trial completed", summary.trials_run),
    }
    writeln!(out, "{COMPLETION_MESSAGE}")?;
    Ok(())
}

fn create_study(cli: &Cli, direction: ObjectiveDirection) -> Result<()> {
    let storage = open_storage(&cli.storage)?;
    let study = storage.create_study(&cli.study, direction)?;
    println!("Created study {} ({}) in {}", study.name, study.direction, cli.storage);
    Ok(())
}

fn best_trial(cli: &Cli) -> Result<()> {
    let storage = open_storage(&cli.storage)?;
    let study = Study::load(
        storage,
        &cli.study,
        Box::new(RandomSampler::new()),
        Box::new(NopPruner),
    )?;
    let best = study.best_trial()?;
    println!("{}", serde_json::to_string_pretty(&best)?);
    Ok(())
}

fn make_synthetic(output: &Path, rows: usize, features: usize, seed: u64) -> Result<()> {
    let bundle = DatasetBundle::synthetic(rows, features, seed)?;
    bundle
        .write_npz(output)
        .with_context(|| format!("writing {}", output.display()))?;
    println!("Wrote synthetic bundle to {}", output.display());
    Ok(())
}
