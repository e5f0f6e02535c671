use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cdd::{
    config::{ClusterParams, ParamOverrides},
    dedup::{
        grouper::{LinfaDbscan, Metric},
        pipeline::{self, RunRequest},
        result::RunResult,
    },
    display::report::{GroupListing, RunSummary},
};
use clap::{Args, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

/// cdd: Conversation De-Duplication
#[derive(Parser)]
#[command(name = "cdd")]
#[command(about = "Group near-duplicate embeddings with bucketed DBSCAN", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Cluster an embedding table and write the groups as JSON.
    Run {
        /// Parquet file with `id` and `embedding` columns.
        #[arg(short, long)]
        embedding: PathBuf,

        /// Result file. Defaults to the embedding path with a `.cluster.json` extension.
        #[arg(short, long)]
        save_path: Option<PathBuf>,

        /// Overwrite an existing result.
        #[arg(short, long)]
        force: bool,

        /// Keep the groups of an existing result and cluster only the remaining ids.
        #[arg(short, long)]
        resume: bool,

        /// TOML file with parameter defaults. Defaults to ~/.config/cdd/cluster.toml.
        #[arg(short, long, env = "CDD_CONFIG")]
        config: Option<PathBuf>,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Print the groups of a result file, largest first.
    View {
        #[arg(short, long)]
        cluster_path: PathBuf,

        /// Show at most this many groups.
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[derive(Args)]
struct ParamArgs {
    #[arg(long, value_enum)]
    metric: Option<Metric>,

    /// DBSCAN radius of the first epoch.
    #[arg(long)]
    eps: Option<f32>,

    /// Per-epoch multiplier on the radius.
    #[arg(long)]
    eps_decay: Option<f32>,

    /// Neighbours (including the point itself) that make a point dense.
    #[arg(long)]
    min_samples: Option<usize>,

    /// Larger groups are re-split with half the radius.
    #[arg(long)]
    max_samples: Option<usize>,

    #[arg(long)]
    epochs: Option<usize>,

    /// Most records handed to one DBSCAN call.
    #[arg(long)]
    bucket_size: Option<usize>,

    /// Seed for the between-epoch shuffle.
    #[arg(long)]
    seed: Option<u64>,

    /// Cluster the buckets of a pass in parallel.
    #[arg(long)]
    parallel: bool,
}

impl From<&ParamArgs> for ParamOverrides {
    fn from(a: &ParamArgs) -> Self {
        Self {
            metric: a.metric,
            eps: a.eps,
            eps_decay: a.eps_decay,
            min_samples: a.min_samples,
            max_samples: a.max_samples,
            epochs: a.epochs,
            bucket_size: a.bucket_size,
            seed: a.seed,
            parallel: a.parallel,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Run {
            embedding,
            save_path,
            force,
            resume,
            config,
            params,
        } => handle_run(
            embedding,
            save_path.as_deref(),
            *force,
            *resume,
            config.as_deref(),
            params.into(),
        ),
        Commands::View {
            cluster_path,
            limit,
        } => handle_view(cluster_path, *limit),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Handle a run command.
/// - `overrides`: flags given on the command line, applied over the TOML file
fn handle_run(
    embedding: &Path,
    save_path: Option<&Path>,
    force: bool,
    resume: bool,
    config: Option<&Path>,
    overrides: ParamOverrides,
) -> Result<()> {
    let params = ClusterParams::load(config)?.with_overrides(&overrides);
    debug!("{:?}", params);
    let params = params.validate()?;

    let request = RunRequest::new(embedding, save_path, force, resume, params)?;
    let report = pipeline::run(&LinfaDbscan, &request)
        .with_context(|| format!("clustering {}", embedding.display()))?;
    print!("{}", RunSummary(&report));
    Ok(())
}

fn handle_view(cluster_path: &Path, limit: Option<usize>) -> Result<()> {
    let result = RunResult::read(cluster_path)?;
    print!("{}", GroupListing::new(&result, limit));
    Ok(())
}
