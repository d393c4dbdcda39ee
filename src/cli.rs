// vidhash CLI binary

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use rusqlite::Connection;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};

use vidhash_lib::db::schema;
use vidhash_lib::db::{get_db_path, open_db};
use vidhash_lib::evaluate::{evaluate_all, Evaluation};
use vidhash_lib::hashing::runner::run_hashing;
use vidhash_lib::hashing::{HashAlgorithm, Registry, Selection};
use vidhash_lib::tools::ExternalTool;
use vidhash_lib::transcode::transcode_directory;

#[derive(Parser)]
#[command(name = "vidhash")]
#[command(about = "Evaluate perceptual video hashing algorithms against ground-truth variant sets", long_about = None)]
#[command(version)]
struct Cli {
    /// Store path (defaults to $VIDHASH_DB_PATH, then ./videohash.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct Shard {
    /// Which shard of the algorithm list to run (1-based)
    #[arg(long, default_value = "1")]
    part: usize,
    /// Number of shards the algorithm list is split into
    #[arg(long = "n-parts", default_value = "1")]
    n_parts: usize,
    /// Comma-separated algorithm names, or "all"
    #[arg(long, default_value = "all")]
    experiments: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcode, hash and evaluate the selected algorithms
    Run {
        /// Directory of source videos
        dir: Option<PathBuf>,
        /// Redo work that is already stored
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        shard: Shard,
    },

    /// Produce the re-encoded variants of every source video
    Transcode {
        /// Directory of source videos
        dir: Option<PathBuf>,
        /// Re-encode variants that are already registered
        #[arg(long)]
        force: bool,
    },

    /// Fingerprint every registered video with the selected algorithms
    Hash {
        /// Directory of videos
        dir: Option<PathBuf>,
        /// Recompute existing fingerprints
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        shard: Shard,
    },

    /// Compute distances and search the best threshold
    Evaluate {
        /// Discard stored results and overwrite them
        #[arg(long)]
        force: bool,
        #[command(flatten)]
        shard: Shard,
    },

    /// List registered algorithms and their best stored accuracy
    Algorithms,

    /// List ground-truth sets and their members
    Sets,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    configure_logs(cli.quiet, cli.verbose)?;

    let conn = open_db(&get_db_path(cli.db.as_deref()))?;
    let registry = Registry::with_defaults();

    match cli.command {
        Commands::Run { dir, force, shard } => cmd_run(&conn, &registry, require_dir(dir), force, &shard),
        Commands::Transcode { dir, force } => cmd_transcode(&conn, &require_dir(dir), force),
        Commands::Hash { dir, force, shard } => cmd_hash(&conn, &registry, &require_dir(dir), force, &shard),
        Commands::Evaluate { force, shard } => cmd_evaluate(&conn, &registry, force, &shard),
        Commands::Algorithms => cmd_algorithms(&conn, &registry),
        Commands::Sets => cmd_sets(&conn),
    }
}

fn configure_logs(quiet: bool, verbose: bool) -> Result<()> {
    let level = match (quiet, verbose) {
        (true, _) => LevelFilter::Warn,
        (_, true) => LevelFilter::Debug,
        _ => LevelFilter::Info,
    };

    let mut cfg = ConfigBuilder::new();
    cfg.set_time_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off);

    TermLogger::init(level, cfg.build(), TerminalMode::Stderr, ColorChoice::Auto)?;
    Ok(())
}

fn require_dir(dir: Option<PathBuf>) -> PathBuf {
    match dir {
        Some(dir) if dir.is_dir() => dir,
        _ => {
            eprintln!("Must specify directory as first argument");
            std::process::exit(1);
        }
    }
}

fn select<'r>(registry: &'r Registry, shard: &Shard) -> Result<Vec<&'r dyn HashAlgorithm>> {
    let selection: Selection = shard.experiments.parse()?;
    let algorithms = registry.partition(shard.part, shard.n_parts, &selection)?;
    if algorithms.is_empty() {
        log::warn!("No algorithms selected for part {} of {}", shard.part, shard.n_parts);
    }
    Ok(algorithms)
}

fn cmd_run(conn: &Connection, registry: &Registry, dir: PathBuf, force: bool, shard: &Shard) -> Result<()> {
    cmd_transcode(conn, &dir, force)?;
    println!();
    cmd_hash(conn, registry, &dir, force, shard)?;
    println!();
    cmd_evaluate(conn, registry, force, shard)
}

fn cmd_transcode(conn: &Connection, dir: &Path, force: bool) -> Result<()> {
    ExternalTool::Ffprobe.ensure_available()?;
    ExternalTool::Ffmpeg.ensure_available()?;

    println!("Transcoding videos in {}", dir.display());
    let result = transcode_directory(conn, dir, force)?;

    println!();
    println!("Transcode complete:");
    println!("  Sources:   {}", result.sources);
    println!("  Encoded:   {}", result.encoded);
    println!("  Failed:    {}", result.failed);
    Ok(())
}

fn cmd_hash(conn: &Connection, registry: &Registry, dir: &Path, force: bool, shard: &Shard) -> Result<()> {
    let algorithms = select(registry, shard)?;
    let needed: BTreeSet<ExternalTool> = algorithms.iter().flat_map(|a| a.tools().iter().copied()).collect();
    for tool in needed {
        tool.ensure_available()?;
    }

    println!("Hashing videos in {} with {} algorithms", dir.display(), algorithms.len());
    println!();
    println!("{:<32}  {:>7}  {:>7}  {:>7}  {:>7}", "Algorithm", "Visited", "Hashed", "Skipped", "Failed");
    println!("{}", "-".repeat(68));

    for algorithm in algorithms {
        let result = run_hashing(conn, algorithm, dir, force)?;
        println!(
            "{:<32}  {:>7}  {:>7}  {:>7}  {:>7}",
            algorithm.name(),
            result.visited,
            result.hashed,
            result.skipped,
            result.failed
        );
    }
    Ok(())
}

fn cmd_evaluate(conn: &Connection, registry: &Registry, force: bool, shard: &Shard) -> Result<()> {
    let algorithms = select(registry, shard)?;
    let results = evaluate_all(conn, &algorithms, force)?;

    if results.is_empty() {
        println!("Nothing to evaluate.");
        return Ok(());
    }

    println!(
        "{:<32}  {:>8}  {:>9}  {:>5}  {:>5}  {:>5}  {:>5}",
        "Algorithm", "Accuracy", "Threshold", "TP", "TN", "FP", "FN"
    );
    println!("{}", "-".repeat(86));
    for evaluation in &results {
        print_evaluation(evaluation);
    }
    Ok(())
}

fn print_evaluation(evaluation: &Evaluation) {
    let r = &evaluation.record;
    let note = if evaluation.reused {
        "(stored)"
    } else if evaluation.persisted {
        ""
    } else {
        "(not better than stored)"
    };
    println!(
        "{:<32}  {:>8.4}  {:>9.4}  {:>5}  {:>5}  {:>5}  {:>5}  {}",
        evaluation.algorithm,
        r.accuracy,
        r.threshold,
        r.true_positives,
        r.true_negatives,
        r.false_positives,
        r.false_negatives,
        note
    );
}

fn cmd_algorithms(conn: &Connection, registry: &Registry) -> Result<()> {
    let stored = schema::list_algorithms(conn)?;

    println!("{:<32}  {:>6}  {:>8}  {:>9}", "Algorithm", "Max", "Accuracy", "Threshold");
    println!("{}", "-".repeat(62));

    for algorithm in registry.iter() {
        let best = stored
            .iter()
            .find(|row| row.name == algorithm.name())
            .and_then(|row| row.best.as_ref());

        let (accuracy, threshold) = match best {
            Some(r) => (format!("{:.4}", r.accuracy), format!("{:.4}", r.threshold)),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<32}  {:>6}  {:>8}  {:>9}",
            algorithm.name(),
            algorithm.max_threshold(),
            accuracy,
            threshold
        );
    }

    let orphans: Vec<&str> = stored
        .iter()
        .map(|row| row.name.as_str())
        .filter(|name| registry.get(name).is_err())
        .collect();
    if !orphans.is_empty() {
        println!();
        println!("Stored but not registered: {}", orphans.join(", "));
    }
    Ok(())
}

fn cmd_sets(conn: &Connection) -> Result<()> {
    let sets = schema::all_sets(conn)?;

    if sets.is_empty() {
        println!("No sets found. Use 'vidhash transcode <dir>' to build them.");
        return Ok(());
    }

    println!("{:>5}  {:>7}  {}", "Set", "Videos", "Members");
    println!("{}", "-".repeat(70));

    for set in sets {
        let members: Vec<String> = set.videos().map(|v| v.file_name()).collect();
        println!("{:>5}  {:>7}  {}", set.id, set.len(), members.join(", "));
    }
    Ok(())
}
