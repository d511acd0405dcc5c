//! Media Sync CLI
//!
//! Scans media roots into a SQLite library and lists its contents.

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use media_sync::{
    CancellationToken, HashPolicy, LibraryScanner, LibraryStore, MediaFilter, ProgressReporter,
    Root, ScanConfig, ScanError, ScanSummary, SqliteLibrary,
};

const ABOUT: &str = r#"
Media Sync - keeps a karaoke/video library in step with the filesystem

Examples:
  media_sync scan -r /music                     scan one root
  media_sync scan -r /music -r /videos          scan several roots
  media_sync scan -r /music --hash-policy never skip content hashing
  media_sync scan -r /music --json              print the summary as JSON
  media_sync list -d library.db                 list library entries
"#;

/// Media library synchronizer
#[derive(Parser)]
#[command(name = "media_sync")]
#[command(author, version, about = ABOUT, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// SQLite library file
    #[arg(short = 'd', long, global = true, default_value = "media_sync.db")]
    db: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan roots and reconcile the library
    Scan {
        /// Root directory to scan (repeatable)
        #[arg(short = 'r', long = "root", required = true)]
        roots: Vec<PathBuf>,

        /// When to compute content hashes: never, pairs, always
        #[arg(long, default_value = "pairs")]
        hash_policy: HashPolicy,

        /// Per-folder override file name
        #[arg(long)]
        folder_config: Option<String>,

        /// Emit JSON progress lines on stderr
        #[arg(long)]
        progress: bool,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },
    /// List library entries
    List {
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    // Initialize logger
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Scan {
            roots,
            hash_policy,
            folder_config,
            progress,
            json,
        }) => run_scan(&cli.db, roots, hash_policy, folder_config, progress, json),
        Some(Commands::List { json }) => run_list(&cli.db, json),
        None => {
            println!("{}", ABOUT);
            println!("Run 'media_sync --help' for all options");
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_scan(
    db_path: &Path,
    root_paths: Vec<PathBuf>,
    hash_policy: HashPolicy,
    folder_config: Option<String>,
    progress: bool,
    json: bool,
) -> Result<(), ScanError> {
    let mut db = SqliteLibrary::open(db_path)?;

    let mut roots = Vec::with_capacity(root_paths.len());
    for path in root_paths {
        let path = std::fs::canonicalize(&path).unwrap_or(path);
        let id = db.ensure_root(&path)?;
        roots.push(Root::new(id, path));
    }
    info!("Roots: {:?}", roots);

    let mut builder = ScanConfig::builder().roots(roots).hash_policy(hash_policy);
    if let Some(name) = folder_config {
        builder = builder.folder_config_name(name);
    }
    let config = builder.build();

    let reporter = ProgressReporter::new(progress, config.progress_interval_ms);
    let scanner = LibraryScanner::new(config, db);
    let summary = scanner.scan(&CancellationToken::new(), &reporter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn print_summary(summary: &ScanSummary) {
    if summary.is_clean() {
        println!("Scan completed:");
    } else {
        println!("Scan completed with warnings:");
    }
    println!("  New: {}", summary.new);
    println!("  Unchanged: {}", summary.unchanged);
    println!("  Skipped: {}", summary.skipped);
    println!("  Removed: {}", summary.removed);
    println!("  Replaced: {}", summary.replaced);
    println!("  Duration: {}ms", summary.duration_ms);
    if !summary.unreachable_roots.is_empty() {
        println!("  Unreachable roots: {:?}", summary.unreachable_roots);
    }
    for skipped in &summary.skipped_paths {
        println!(
            "  skipped {} ({:?}: {})",
            skipped.path.display(),
            skipped.reason,
            skipped.message
        );
    }
    for warning in &summary.warnings {
        println!("  warning: {}", warning);
    }
}

fn run_list(db_path: &Path, json: bool) -> Result<(), ScanError> {
    let db = SqliteLibrary::open(db_path)?;
    let entries = db.search(&MediaFilter::all())?;

    if json {
        let list: Vec<_> = entries.iter().collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    let roots = db.roots()?;
    for entry in entries.iter() {
        let root = roots
            .iter()
            .find(|r| r.id == entry.root_id)
            .map(|r| r.path.display().to_string())
            .unwrap_or_else(|| format!("#{}", entry.root_id));
        println!(
            "{:>6}  {:<40} {:<30} {:>7.1}s  {}/{}",
            entry.id,
            entry.title,
            entry.artist.as_deref().unwrap_or("-"),
            entry.duration,
            root,
            entry.rel_path
        );
    }
    println!("{} entries", entries.len());
    Ok(())
}
