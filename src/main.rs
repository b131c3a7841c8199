use clap::{CommandFactory, Parser};
use fnv::FnvHashSet;
use lsh_knn::io::ParserKind;
use lsh_knn::layout::Aos;
use lsh_knn::options::{HashFamilyKind, Options};
use lsh_knn::run::{execute, Job};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Distributed approximate k-nearest-neighbor search with locality
/// sensitive hashing.
#[derive(Debug, Parser)]
#[command(name = "lsh-knn", version, rename_all = "snake_case")]
struct Cli {
    /// Path to the data file.
    #[arg(long)]
    data_file: PathBuf,

    /// Number of nearest neighbors to search for.
    #[arg(long)]
    k: usize,

    /// Parser for the data file ('binary_parser' or 'arff_parser').
    #[arg(long, default_value_t = ParserKind::Binary)]
    file_parser: ParserKind,

    /// Number of workers sharing the point set.
    #[arg(long, default_value_t = 1)]
    num_workers: usize,

    /// Options file loaded before the command line overrides apply.
    #[arg(long)]
    options_file: Option<PathBuf>,

    /// Write the effective options to this file.
    #[arg(long)]
    options_save_file: Option<PathBuf>,

    /// Write the found neighbor IDs to this file.
    #[arg(long)]
    knn_save_file: Option<PathBuf>,

    /// Write the found neighbor distances to this file.
    #[arg(long)]
    knn_dist_save_file: Option<PathBuf>,

    /// Ground-truth neighbor IDs to evaluate the recall against.
    #[arg(long)]
    evaluate_knn_file: Option<PathBuf>,

    /// Ground-truth neighbor distances to evaluate the error ratio against.
    #[arg(long)]
    evaluate_knn_dist_file: Option<PathBuf>,

    /// The hash function family ('random_projections', 'entropy_based' or
    /// 'mixed').
    #[arg(long)]
    hash_functions_type: Option<HashFamilyKind>,

    /// Number of hash functions in the hash pool.
    #[arg(long)]
    hash_pool_size: Option<usize>,

    /// Number of hash functions per hash table.
    #[arg(long)]
    num_hash_functions: Option<usize>,

    /// Number of hash tables.
    #[arg(long)]
    num_hash_tables: Option<usize>,

    /// Size of each hash table.
    #[arg(long)]
    hash_table_size: Option<usize>,

    /// Segment size of the random projections hash functions.
    #[arg(long)]
    w: Option<f32>,

    /// Number of cut-off points of the entropy-based hash functions.
    #[arg(long)]
    num_cut_off_points: Option<usize>,

    /// Number of buckets scanned per hash table and query, the primary
    /// bucket included.
    #[arg(long)]
    num_multi_probes: Option<usize>,

    /// Seed of the hash family builders (0 seeds from the OS).
    #[arg(long)]
    seed: Option<u64>,
}

/// The first command line key that occurs more than once, if any.
fn duplicate_key(args: &[String]) -> Option<String> {
    let mut seen = FnvHashSet::default();
    for arg in args {
        if let Some(stripped) = arg.strip_prefix("--") {
            let key = stripped.split('=').next().unwrap_or(stripped);
            if !key.is_empty() && !seen.insert(key.to_string()) {
                return Some(key.to_string());
            }
        }
    }
    None
}

/// Parse the command line. A repeated key is rejected up front: clap's
/// last-one-wins override would otherwise accept it silently.
fn parse_cli(args: &[String]) -> Result<Cli, clap::Error> {
    if let Some(key) = duplicate_key(args.get(1..).unwrap_or(&[])) {
        return Err(Cli::command().error(
            clap::error::ErrorKind::ArgumentConflict,
            format!("the argument '--{}' cannot be used multiple times", key),
        ));
    }
    Cli::try_parse_from(args)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match real_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn real_main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let cli = match parse_cli(&args) {
        Ok(cli) => cli,
        // prints help/version or the parse error and sets the exit code
        Err(e) => e.exit(),
    };

    let mut options: Options = match &cli.options_file {
        Some(path) => {
            info!(file = %path.display(), "reading options from file");
            Options::load(path)?
        }
        None => Options::default(),
    };
    if let Some(v) = cli.hash_functions_type {
        options.hash_family = v;
    }
    if let Some(v) = cli.hash_pool_size {
        options.hash_pool_size = v;
    }
    if let Some(v) = cli.num_hash_functions {
        options.num_hash_functions = v;
    }
    if let Some(v) = cli.num_hash_tables {
        options.num_hash_tables = v;
    }
    if let Some(v) = cli.hash_table_size {
        options.hash_table_size = v;
    }
    if let Some(v) = cli.w {
        options.w = v;
    }
    if let Some(v) = cli.num_cut_off_points {
        options.num_cut_off_points = v;
    }
    if let Some(v) = cli.num_multi_probes {
        options.num_multi_probes = v;
    }
    if let Some(v) = cli.seed {
        options.seed = v;
    }
    options.validate()?;

    if let Some(path) = &cli.options_save_file {
        options.save(path)?;
        info!(file = %path.display(), "saved options");
    }

    let job = Job {
        data_file: cli.data_file,
        parser: cli.file_parser,
        k: cli.k,
        num_workers: cli.num_workers,
        options,
        knn_save_file: cli.knn_save_file,
        knn_dist_save_file: cli.knn_dist_save_file,
        evaluate_knn_file: cli.evaluate_knn_file,
        evaluate_knn_dist_file: cli.evaluate_knn_dist_file,
    };

    let report = execute::<f32, u32, u32, Aos>(&job)?;
    if let Some(recall) = report.recall {
        info!(recall, "recall [%]");
    }
    if let Some(error_ratio) = report.error_ratio {
        info!(
            error_ratio,
            points_with_missing = report.points_with_missing,
            missing_slots = report.missing_slots,
            "error ratio"
        );
    }
    Ok(())
}
