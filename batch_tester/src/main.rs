//! Batch tester: command-line harness for a REFUGE-style fundus corpus.
//!
//! # Usage
//!
//! ```bash
//! batch_tester --dataset ./REFUGE_sample manifest --json
//! batch_tester check
//! batch_tester validate scans/*.jpg --min-dimension 256
//! batch_tester extract ./test_set --max-samples 20
//! batch_tester --api-url http://localhost:5000/predict classify eye.jpg
//! batch_tester evaluate --split test --samples 10 --concurrency 4
//! ```
//!
//! Environment variables (`REFUGE_DATASET_ROOT`, `REFUGE_API_URL`, ...) set the defaults;
//! flags override them.

mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fundus_screen::core_modules::subset_extractor::DEFAULT_MAX_SAMPLES;
use fundus_screen::{BatchEvaluator, BatchRequest, InferenceClient, ScreeningConfig, Split, SubsetExtractor};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Index a fundus image corpus and score a remote glaucoma classifier against it.
#[derive(Parser)]
#[command(name = "batch_tester", version, about)]
struct Cli {
    /// Dataset root containing training/validation/test splits
    #[arg(long, global = true)]
    dataset: Option<PathBuf>,

    /// Classification endpoint URL
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Count images per split and category
    Manifest {
        /// Output the manifest as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report which split and category directories exist
    Check,
    /// List the samples an evaluation would draw from a split
    Samples {
        #[arg(long, default_value = "test")]
        split: Split,
        /// Maximum samples per category
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Run the local acceptance heuristics on image files
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        min_dimension: Option<u32>,
        #[arg(long)]
        min_contrast: Option<f64>,
    },
    /// Copy a small balanced subset of training/validation images
    Extract {
        destination: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_SAMPLES)]
        max_samples: usize,
    },
    /// Send one image to the classifier
    Classify { file: PathBuf },
    /// Score the classifier against a split
    Evaluate {
        #[arg(long, default_value = "test")]
        split: Split,
        /// Maximum samples per category
        #[arg(long, default_value_t = 5)]
        samples: usize,
        /// Skip glaucoma samples
        #[arg(long)]
        no_glaucoma: bool,
        /// Skip non-glaucoma samples
        #[arg(long)]
        no_normal: bool,
        /// Keep up to N requests in flight (default: one at a time)
        #[arg(long)]
        concurrency: Option<usize>,
        /// Fan out with the configured default concurrency
        #[arg(long, conflicts_with = "concurrency")]
        parallel: bool,
        /// Reject images locally before sending them
        #[arg(long)]
        prescreen: bool,
        /// Output the full report as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = ScreeningConfig::from_env();
    if let Some(dataset) = cli.dataset {
        config.dataset_root = dataset;
    }
    if let Some(api_url) = cli.api_url {
        config.endpoint = api_url;
    }
    if let Some(secs) = cli.timeout {
        config.request_timeout = Duration::from_secs(secs);
    }

    match cli.command {
        Command::Manifest { json } => {
            let manifest = config.dataset_index().build_manifest();
            if json {
                println!("{}", output::format_json(&manifest));
            } else {
                print!("{}", output::format_manifest(&manifest));
            }
        }
        Command::Check => {
            let index = config.dataset_index();
            print!("{}", output::format_structure(index.root(), &index.structure_report()));
        }
        Command::Samples { split, limit } => {
            let samples = config.dataset_index().sample_images(split, limit);
            print!("{}", output::format_samples(split, &samples));
        }
        Command::Validate {
            files,
            min_dimension,
            min_contrast,
        } => {
            if let Some(min_dimension) = min_dimension {
                config.acceptance.min_dimension = min_dimension;
            }
            if let Some(min_contrast) = min_contrast {
                config.acceptance.min_contrast = min_contrast;
            }
            validate_files(&config, &files).await;
        }
        Command::Extract {
            destination,
            max_samples,
        } => {
            let report = SubsetExtractor::new(config.dataset_index())
                .extract(&destination, max_samples)
                .with_context(|| format!("failed to extract subset into {}", destination.display()))?;
            print!("{}", output::format_extraction(&report));
        }
        Command::Classify { file } => {
            let client = config.inference_client()?;
            let result = classify_file(&client, &file, config.request_timeout).await?;
            print!("{}", output::format_prediction(&file, &result));
        }
        Command::Evaluate {
            split,
            samples,
            no_glaucoma,
            no_normal,
            concurrency,
            parallel,
            prescreen,
            json,
        } => {
            config.prescreen = prescreen;
            let request = BatchRequest {
                split,
                sample_count: samples,
                include_glaucoma: !no_glaucoma,
                include_non_glaucoma: !no_normal,
            };
            let limit = if parallel { Some(config.concurrency) } else { concurrency };
            evaluate(&config, &request, limit, json).await?;
        }
    }

    Ok(())
}

async fn validate_files(config: &ScreeningConfig, files: &[PathBuf]) {
    for file in files {
        let outcome = match tokio::fs::read(file).await {
            Ok(bytes) => config.acceptance.validate(&bytes),
            Err(err) => {
                warn!(path = %file.display(), error = %err, "could not read file");
                config.acceptance.validate(&[])
            }
        };
        println!("{}", output::format_validation(file, &outcome));
    }
}

async fn classify_file(
    client: &InferenceClient,
    file: &Path,
    timeout: Duration,
) -> Result<fundus_screen::PredictionResult> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.jpg".to_string());
    info!(endpoint = client.endpoint(), filename = %filename, "classifying single image");
    Ok(client.classify(bytes, &filename, timeout).await)
}

async fn evaluate(config: &ScreeningConfig, request: &BatchRequest, limit: Option<usize>, json: bool) -> Result<()> {
    let client = config.inference_client()?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing the current sample");
            let _ = cancel_tx.send(true);
        }
    });

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let progress_bar = bar.clone();
    let evaluator = BatchEvaluator::from_config(config, client)
        .with_cancellation(cancel_rx)
        .with_progress(move |progress| {
            progress_bar.set_length(progress.total as u64);
            progress_bar.set_position(progress.completed as u64);
            progress_bar.set_message(progress.sample.filename.clone());
        });

    let report = match limit {
        Some(limit) => evaluator.run_concurrent(request, limit).await?,
        None => evaluator.run_request(request).await?,
    };
    bar.finish_and_clear();

    if json {
        println!("{}", output::format_json(&report));
    } else {
        print!("{}", output::format_report(&report));
    }
    Ok(())
}
