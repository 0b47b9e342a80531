// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Error, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use interaction_eqtl::{output, run_scan, MatrixSource, ScanConfig, TsvMatrixSource};
use log::{debug, info, warn};
use std::{
    path::PathBuf,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting interaction_eqtl with args: {:?}", cli_args);

    // Worker threads do the model fitting; the rayon pool only parses table rows.
    let num_workers = cli_args.workers.unwrap_or_else(num_cpus::get);
    info!("Using {} scan workers.", num_workers);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_workers)
        .build_global()?;

    // --- 1. Open Input Tables ---
    info!(
        "Opening genotype {}, expression {}, covariates {}",
        cli_args.genotype.display(),
        cli_args.expression.display(),
        cli_args.covariates.display()
    );
    let source = TsvMatrixSource::open(&cli_args.genotype, &cli_args.expression, &cli_args.covariates)?;
    info!("Tables share {} samples.", source.sample_names().len());
    debug!(
        "Sample names (first 5): {:?}",
        source.sample_names().iter().take(5).collect::<Vec<_>>()
    );

    // --- 2. Build Scan Configuration ---
    let config = cli::build_config(&cli_args, num_workers)?;
    if config.n_permutations > 0 {
        info!(
            "Running {} permutations per test with seed {}.",
            config.n_permutations, config.permutation_seed
        );
    }
    if config.technical_covariates.is_empty() {
        warn!("No technical covariates given; the null model is intercept-only.");
    }

    // --- 3. Run Scan ---
    let pb_style = ProgressStyle::default_bar()
        .template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} loci ({percent}%) ETA: {eta}",
        )
        .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?
        .progress_chars("=> ");
    let pb = ProgressBar::new(0).with_style(pb_style);

    let results = run_scan(&config, &source, &pb)?;

    // --- 4. Write Outputs ---
    let output_prefix_path = PathBuf::from(&cli_args.output_prefix);
    if let Some(parent) = output_prefix_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow!("Failed to create output directory {}: {}", parent.display(), e)
            })?;
            info!("Created output directory: {}", parent.display());
        }
    }
    let written = output::write_results(&cli_args.output_prefix, &results)?;
    for path in &written {
        info!("Wrote {}", path.display());
    }

    info!(
        "interaction_eqtl finished in {:.2?}: {} loci tested, {} skipped.",
        total_time_start.elapsed(),
        results.summary.loci_processed,
        results.summary.loci_skipped
    );
    Ok(())
}

// --- Module Implementations ---

mod cli {
    use super::{anyhow, Duration, Result, ScanConfig, SystemTime, UNIX_EPOCH};
    use clap::Parser;
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Interaction eQTL scan with nested linear models.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[arg(short = 'g', long, required = true)]
        pub(crate) genotype: PathBuf,

        #[arg(short = 'e', long, required = true)]
        pub(crate) expression: PathBuf,

        #[arg(short = 'c', long, required = true)]
        pub(crate) covariates: PathBuf,

        /// Covariates always included in the null model.
        #[arg(long = "tech-covs", value_delimiter = ',')]
        pub(crate) tech_covs: Vec<String>,

        #[arg(short, long = "out", required = true)]
        pub(crate) output_prefix: String,

        #[arg(short = 'w', long)]
        pub(crate) workers: Option<usize>,

        #[arg(long, default_value_t = 50)]
        pub(crate) chunk_size: usize,

        #[arg(short = 'p', long, default_value_t = 0)]
        pub(crate) permutations: usize,

        #[arg(long)]
        pub(crate) seed: Option<u64>,

        /// Stop taking new chunks after this many seconds.
        #[arg(long, conflicts_with = "max_end_time")]
        pub(crate) max_runtime: Option<u64>,

        /// Stop taking new chunks after this unix timestamp (seconds).
        #[arg(long)]
        pub(crate) max_end_time: Option<u64>,

        #[arg(long)]
        pub(crate) max_loci: Option<usize>,

        #[arg(long, default_value = "Info")]
        pub(crate) log_level: String,
    }

    pub(crate) fn build_config(args: &CliArgs, workers: usize) -> Result<ScanConfig> {
        let mut config = ScanConfig::new(workers, args.chunk_size, args.tech_covs.clone())
            .with_permutations(args.permutations)
            .with_max_loci(args.max_loci);
        if let Some(seed) = args.seed {
            config = config.with_seed(seed);
        }
        if let Some(secs) = args.max_runtime {
            config = config.with_max_runtime(Duration::from_secs(secs));
        }
        if let Some(ts) = args.max_end_time {
            let deadline = UNIX_EPOCH
                .checked_add(Duration::from_secs(ts))
                .ok_or_else(|| anyhow!("--max-end-time {} is out of range", ts))?;
            if deadline <= SystemTime::now() {
                return Err(anyhow!("--max-end-time {} is already in the past", ts));
            }
            config = config.with_deadline(deadline);
        }
        config.validate()?;
        Ok(config)
    }
}
