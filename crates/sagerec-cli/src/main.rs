//! sagerec CLI - GraphSAGE rating prediction from the command line.
//!
//! # Usage
//!
//! ```bash
//! # Load a MovieLens-100K directory and show stats
//! sagerec stats data/ml-100k
//!
//! # Sample a 2-hop flow for a few nodes
//! sagerec sample data/ml-100k --seeds 0,1,950 --fanout 5 --depth 2
//!
//! # Train, printing train MSE and test RMSE per epoch
//! sagerec train data/ml-100k --epochs 5 --hidden-dim 32
//!
//! # Train from a JSON config, overriding the epoch count
//! sagerec train data/ml-100k --config train.json --epochs 2 --report report.json
//! ```
//!
//! Set `RUST_LOG` (e.g. `RUST_LOG=sagerec_nn=debug`) for per-batch logging.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use sagerec::algo::sampling::{NeighborSampler, SamplerConfig};
use sagerec::formats::{MovieLens, TestSplit};
use sagerec::nn::{Trainer, TrainingConfig};
use sagerec::{NodeId, RatingGraph};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "sagerec")]
#[command(about = "GraphSAGE recommender CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show statistics about a MovieLens directory
    Stats {
        /// Directory holding u.user, u.item and u.data
        input: PathBuf,

        #[command(flatten)]
        split: SplitArgs,
    },

    /// Sample a layered flow around some nodes
    Sample {
        /// Directory holding u.user, u.item and u.data
        input: PathBuf,

        /// Comma-separated target node ids
        #[arg(long, value_delimiter = ',', required = true)]
        seeds: Vec<NodeId>,

        /// Neighbors sampled per node per layer
        #[arg(long, default_value = "10")]
        fanout: usize,

        /// Number of layers
        #[arg(long, default_value = "2")]
        depth: usize,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Sample each layer across threads
        #[arg(long)]
        parallel: bool,
    },

    /// Train the encoder and scorer
    Train {
        /// Directory holding u.user, u.item and u.data
        input: PathBuf,

        /// JSON training config; flags below override its fields
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write the per-epoch report as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        #[command(flatten)]
        overrides: TrainOverrides,

        #[command(flatten)]
        split: SplitArgs,
    },
}

#[derive(Args)]
struct SplitArgs {
    /// Fraction of ratings held out as test edges
    #[arg(long, default_value = "0.1")]
    test_fraction: f64,

    /// Seed for the test split
    #[arg(long, default_value = "42")]
    split_seed: u64,
}

impl SplitArgs {
    fn split(&self) -> TestSplit {
        if self.test_fraction > 0.0 {
            TestSplit::Fraction {
                fraction: self.test_fraction,
                seed: self.split_seed,
            }
        } else {
            TestSplit::None
        }
    }
}

#[derive(Args)]
struct TrainOverrides {
    #[arg(long)]
    epochs: Option<usize>,

    #[arg(long)]
    hidden_dim: Option<usize>,

    #[arg(long)]
    fanout: Option<usize>,

    #[arg(long)]
    depth: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,

    /// Sample each batch's flow across threads
    #[arg(long)]
    parallel: bool,
}

impl TrainOverrides {
    fn apply(&self, mut config: TrainingConfig) -> TrainingConfig {
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(dim) = self.hidden_dim {
            config.hidden_dim = dim;
        }
        if let Some(fanout) = self.fanout {
            config.fanout = fanout;
        }
        if let Some(depth) = self.depth {
            config.depth = depth;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(lr) = self.learning_rate {
            config.learning_rate = lr;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.parallel {
            config.parallel_sampling = true;
        }
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stats { input, split } => cmd_stats(&input, split.split()),
        Commands::Sample {
            input,
            seeds,
            fanout,
            depth,
            seed,
            parallel,
        } => cmd_sample(&input, &seeds, fanout, depth, seed, parallel),
        Commands::Train {
            input,
            config,
            report,
            overrides,
            split,
        } => cmd_train(
            &input,
            config.as_deref(),
            report.as_deref(),
            &overrides,
            split.split(),
        ),
    }
}

fn load_graph(dir: &Path, split: TestSplit) -> Result<RatingGraph> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", dir.display()));

    let graph = MovieLens::load_dir(dir, split)
        .with_context(|| format!("Failed to load MovieLens data from {}", dir.display()))?;

    pb.finish_with_message(format!("Loaded in {:.2?}", start.elapsed()));
    Ok(graph)
}

fn cmd_stats(input: &Path, split: TestSplit) -> Result<()> {
    let graph = load_graph(input, split)?;
    let stats = graph.stats();
    let vocab = graph.vocabulary();

    println!("Rating Graph Statistics");
    println!("=======================");
    println!("Users:          {}", stats.num_users);
    println!("Items:          {}", stats.num_items);
    println!("Ratings:        {}", stats.num_interactions);
    println!("Test ratings:   {}", stats.num_test);
    println!("Mean rating:    {:.3}", stats.mean_rating);
    println!("Avg user deg:   {:.2}", stats.avg_user_degree);
    println!("Genres:         {}", vocab.genre_dim);
    println!("Occupations:    {}", vocab.occupation);

    Ok(())
}

fn cmd_sample(
    input: &Path,
    seeds: &[NodeId],
    fanout: usize,
    depth: usize,
    seed: u64,
    parallel: bool,
) -> Result<()> {
    let graph = load_graph(input, TestSplit::None)?;

    let start = Instant::now();
    let mut sampler = NeighborSampler::seeded(&graph, SamplerConfig::new(fanout, depth), seed);
    let flow = if parallel {
        sampler.build_flow_par(seeds)
    } else {
        sampler.build_flow(seeds)
    }
    .context("Failed to sample flow")?;
    println!("Sampled flow in {:.2?}", start.elapsed());

    for (i, layer) in flow.layers().iter().enumerate() {
        println!("layer {}: {} nodes", i, layer.len());
    }
    for &target in flow.seeds() {
        let feeds = flow.in_neighbors(0, target).unwrap_or_default();
        let kind = graph.node_type(target)?;
        println!("{} {} <- {:?}", kind, target, feeds);
    }

    Ok(())
}

fn cmd_train(
    input: &Path,
    config_path: Option<&Path>,
    report_path: Option<&Path>,
    overrides: &TrainOverrides,
    split: TestSplit,
) -> Result<()> {
    let base = match config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => TrainingConfig::default(),
    };
    let config = overrides.apply(base);
    if config.epochs == 0 {
        bail!("epochs must be at least 1");
    }

    let graph = load_graph(input, split)?;
    tracing::info!(?config, "starting training");
    let mut trainer = Trainer::new(&graph, config.clone()).context("Invalid training config")?;

    let pb = ProgressBar::new(config.epochs as u64);
    pb.set_style(
        ProgressStyle::with_template("{bar:40} {pos}/{len} epochs [{elapsed_precise}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let start = Instant::now();
    let report = trainer
        .fit_with(|m| {
            pb.suspend(|| match m.test_rmse {
                Some(rmse) => println!(
                    "epoch {} train_mse={:.4} test_rmse={:.4}",
                    m.epoch, m.train_mse, rmse
                ),
                None => println!(
                    "epoch {} train_mse={:.4} test_rmse=n/a",
                    m.epoch, m.train_mse
                ),
            });
            pb.inc(1);
        })
        .context("Training failed")?;
    pb.finish_and_clear();
    println!("Trained {} epochs in {:.2?}", report.epochs.len(), start.elapsed());

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Report written to {}", path.display());
    }

    Ok(())
}
