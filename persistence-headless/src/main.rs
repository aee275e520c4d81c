use clap::Parser;
use dust_persistence_core::{
    AnalysisConfig, AnalysisError, AnalysisOutput, ConfigurationError, FitQuality, OutputTables,
    Pipeline, StoreFile, SyntheticScenario, TimeSeriesStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Dust-event cloud persistence study runner
#[derive(Parser, Debug)]
#[command(name = "persistence-headless")]
#[command(about = "Detect dust events and test post-event cloud persistence", long_about = None)]
struct Args {
    /// Analysis configuration (TOML); defaults to the Mediterranean summer preset
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Input store (JSON boundary format)
    #[arg(short, long, conflicts_with = "synthetic")]
    input: Option<PathBuf>,

    /// Generate a synthetic store instead of reading one
    #[arg(long)]
    synthetic: bool,

    /// Years of synthetic data
    #[arg(long, default_value_t = 6)]
    years: usize,

    /// Seed for synthetic data
    #[arg(long, default_value_t = 7)]
    seed: u64,

    /// Write the synthetic store here for later runs
    #[arg(long, requires = "synthetic")]
    save_store: Option<PathBuf>,

    /// Directory for the output tables
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Override the number of null resamples
    #[arg(long)]
    resamples: Option<usize>,

    /// Run every stage on one thread
    #[arg(long)]
    sequential: bool,

    /// Debug-level logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), AnalysisError> {
    let mut config = match &args.config {
        Some(path) => AnalysisConfig::load(path)?,
        None => AnalysisConfig::mediterranean_summer(),
    };
    if args.sequential {
        config.temporal.parallel = false;
        config.statistics.parallel = false;
    }
    if let Some(n) = args.resamples {
        config.statistics.n_resamples = n;
    }

    let store = load_store(args, &config)?;
    info!(
        "Store: {} timesteps, variables {:?}",
        store.axis().len(),
        store.variables()
    );

    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run(&store)?;
    print_summary(&output);

    if let Some(dir) = &args.output {
        let tables = OutputTables::build(&output, store.axis(), pipeline.config());
        for path in tables.save(dir)? {
            info!("Wrote {}", path.display());
        }
    }
    Ok(())
}

fn load_store(args: &Args, config: &AnalysisConfig) -> Result<TimeSeriesStore, AnalysisError> {
    if let Some(path) = &args.input {
        return Ok(StoreFile::load(path)?.into_store()?);
    }
    if !args.synthetic {
        return Err(ConfigurationError::Missing("--input or --synthetic").into());
    }

    let scenario = SyntheticScenario {
        years: args.years,
        seed: args.seed,
        aod_variable: config.domain.aod_variable.clone(),
        cloud_variables: config.domain.target_variables.clone(),
        focus_months: config.domain.focus_months.clone(),
        ..SyntheticScenario::default()
    };
    let data = scenario.generate()?;
    info!(
        "Synthetic store: {} years from {}, {} injected events",
        scenario.years,
        scenario.start_year,
        data.injected.len()
    );
    if let Some(path) = &args.save_store {
        StoreFile::from_store(&data.store).save(path)?;
        info!("Saved store to {}", path.display());
    }
    Ok(data.store)
}

fn print_summary(output: &AnalysisOutput) {
    let detection = &output.detection;
    println!("\n=== Dust Events ===");
    println!(
        "{} events ({} truncated), {} short runs discarded, {} missing steps, {} off-season",
        output.events.len(),
        detection.truncated_events,
        detection.discarded_short,
        detection.missing_steps,
        detection.out_of_season_steps
    );

    println!("\n=== Decay Fits ===");
    for quality in [
        FitQuality::Ok,
        FitQuality::FitFailed,
        FitQuality::InsufficientData,
        FitQuality::Truncated,
    ] {
        let count = output.fits.iter().filter(|f| f.fit_quality == quality).count();
        println!("  {:<18} {count}", quality.to_string());
    }

    println!("\n=== Significance ===");
    println!(
        "{} / {} null resamples drawn from {} admissible windows",
        output.report.effective_resamples,
        output.report.requested_resamples,
        output.report.null_windows
    );
    for outcome in &output.report.outcomes {
        match &outcome.result {
            Ok(result) => println!(
                "  {:<34} {:>9.4}  p={:.4}  q={:.4}{}",
                outcome.scope.to_string(),
                result.observed_statistic,
                result.p_value,
                result.adjusted_p_value,
                if result.significant { "  *" } else { "" }
            ),
            Err(err) => println!("  {:<34} skipped: {err}", outcome.scope.to_string()),
        }
    }
}
