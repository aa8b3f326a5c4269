//! treesync - Command-line interface for the sync engine.
//!
//! Analyzes a source and destination tree, shows what would change, asks
//! before deleting anything, and applies the plan with progress reporting to
//! stderr.

mod logging;

use clap::Parser;
use std::cell::Cell;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use treesync::{
    create_job, format_bytes, load_config, spawn_analysis, spawn_execution, AutoConfirm,
    ChecksumAlgorithm, ConfirmDeletion, DeletionSummary, EngineError, HashCache, ItemAction,
    ItemOutcome, ProgressCallback, SyncEvent, SyncOptions, SyncPlan, SyncReport, WorkerHandle,
    WorkerOutput,
};

/// treesync - Keep a destination directory in step with a source
#[derive(Parser, Debug)]
#[command(name = "treesync")]
#[command(version)]
#[command(about = "Differential directory sync with hash caching and cloud placeholder awareness")]
struct Args {
    /// Source directory
    #[arg(long, value_name = "PATH")]
    src: PathBuf,

    /// Destination directory (created if missing)
    #[arg(long, value_name = "PATH")]
    dst: PathBuf,

    /// TOML file with sync options; flags override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Hash cache file
    #[arg(long, value_name = "FILE")]
    cache: Option<PathBuf>,

    /// Hash algorithm: md5, sha256, blake3
    #[arg(long, value_name = "ALGORITHM")]
    hash: Option<String>,

    /// Compare by size and modification time only
    #[arg(long)]
    no_verify_hashes: bool,

    /// Do not detect cloud placeholders in the destination
    #[arg(long)]
    no_cloud_aware: bool,

    /// Detect cloud placeholders even if the destination is not under a
    /// recognized sync folder (OneDrive, iCloud, Dropbox, Google Drive)
    #[arg(long, conflicts_with = "no_cloud_aware")]
    cloud_destination: bool,

    /// Delete destination files that are not in the source
    #[arg(long)]
    delete_orphaned: bool,

    /// Delete without asking
    #[arg(long, short = 'y')]
    yes: bool,

    /// Only sync the top level of the source
    #[arg(long)]
    no_recurse: bool,

    /// Analyze and print the plan without changing anything
    #[arg(long)]
    dry_run: bool,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(long, short = 'v')]
    verbose: bool,

    /// Write a timestamped log file into this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

/// How a completed run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Success,
    ItemFailures,
}

impl RunOutcome {
    fn exit_code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::ItemFailures => 1,
        }
    }
}

/// CLI implementation of ProgressCallback for displaying sync progress
struct CliProgress {
    verbose: bool,
    last_progress_update: Cell<Instant>,
}

impl CliProgress {
    fn new(verbose: bool) -> Self {
        CliProgress {
            verbose,
            last_progress_update: Cell::new(Instant::now()),
        }
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn print_progress_bar(percent: u32) -> String {
        let filled = (percent.min(100) / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    /// Max once per 200ms, always for the last item.
    fn should_redraw(&self, index: usize, total: usize) -> bool {
        if index == total || self.last_progress_update.get().elapsed().as_millis() >= 200 {
            self.last_progress_update.set(Instant::now());
            true
        } else {
            false
        }
    }
}

impl ProgressCallback for CliProgress {
    fn on_event(&self, event: &SyncEvent) {
        match event {
            SyncEvent::ScanStarted { root } => {
                eprintln!("Scanning {}...", root.display());
            }
            SyncEvent::ScanProgress { files_found, .. } => {
                eprint!("\r  {} files found", files_found);
                let _ = io::stderr().flush();
            }
            SyncEvent::ScanCompleted {
                files,
                total_bytes,
                excluded_dirs,
                excluded_files,
                remote_only,
                ..
            } => {
                eprintln!("\r  {} files ({})", files, format_bytes(*total_bytes));
                if *excluded_dirs > 0 || *excluded_files > 0 {
                    eprintln!(
                        "  Excluded: {} folders, {} files",
                        excluded_dirs, excluded_files
                    );
                }
                if *remote_only > 0 {
                    eprintln!("  Cloud-only placeholders: {}", remote_only);
                }
            }
            SyncEvent::ItemFailed { result } => {
                if let ItemOutcome::Failed { cause, .. } = &result.outcome {
                    eprintln!("  Warning: {}", cause);
                }
            }
            SyncEvent::DiffStarted {
                source_files,
                destination_files,
            } => {
                eprintln!(
                    "Comparing {} source files with {} destination files...",
                    source_files, destination_files
                );
            }
            SyncEvent::Hashing { path } => {
                if self.verbose {
                    eprintln!("  Hashing {}", path.display());
                }
            }
            SyncEvent::DiffCompleted { .. } => {}
            SyncEvent::ExecutionStarted {
                files_to_copy,
                bytes_to_copy,
                files_to_delete,
            } => {
                eprintln!();
                eprintln!("Copying {} files ({})", files_to_copy, format_bytes(*bytes_to_copy));
                if *files_to_delete > 0 {
                    eprintln!("Deleting {} orphaned files", files_to_delete);
                }
            }
            SyncEvent::ItemCompleted { index, total, result } => {
                if self.verbose {
                    let status = match (&result.action, &result.outcome) {
                        (_, ItemOutcome::Failed { .. }) => "Failed",
                        (_, ItemOutcome::Skipped { .. }) => "Skipped",
                        (ItemAction::Delete, _) => "Deleted",
                        _ => "Copied",
                    };
                    eprintln!("[{:>4}/{}] {}: {}", index, total, status, result.path.display());
                } else if self.should_redraw(*index, *total) {
                    let percent = (*index as f64 / (*total).max(1) as f64 * 100.0) as u32;
                    eprint!(
                        "\rProgress: {} | {}/{} files",
                        Self::print_progress_bar(percent),
                        index,
                        total
                    );
                    let _ = io::stderr().flush();
                }
            }
            SyncEvent::DirectoriesPruned { count } => {
                if self.verbose && *count > 0 {
                    eprintln!("Removed {} empty folders", count);
                }
            }
            SyncEvent::ExecutionCompleted { .. } => {
                if !self.verbose {
                    eprintln!();
                }
            }
        }
    }
}

/// Asks on the terminal before orphaned files are deleted.
struct StdinConfirm;

impl ConfirmDeletion for StdinConfirm {
    fn confirm(&self, summary: &DeletionSummary) -> bool {
        eprintln!();
        eprintln!(
            "{} files ({}) exist only in the destination and will be permanently deleted.",
            summary.count,
            format_bytes(summary.total_bytes)
        );
        eprintln!("Largest:");
        for record in &summary.largest {
            eprintln!("  {} ({})", record.relative_path.display(), format_bytes(record.size));
        }
        if summary.count > summary.largest.len() {
            eprintln!("  ... and {} more", summary.count - summary.largest.len());
        }
        eprint!("Delete these files? [y/N] ");
        let _ = io::stderr().flush();

        let mut answer = String::new();
        if io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    }
}

fn print_plan(plan: &SyncPlan, delete_orphaned: bool) {
    eprintln!();
    eprintln!("Analysis complete:");
    eprintln!(
        "  To copy:   {} files ({})",
        plan.to_copy.len(),
        format_bytes(plan.total_copy_bytes)
    );
    eprintln!(
        "  Unchanged: {} files ({})",
        plan.to_skip.len(),
        format_bytes(plan.skip_bytes())
    );
    eprintln!(
        "  Orphaned:  {} files ({}){}",
        plan.orphaned.len(),
        format_bytes(plan.orphaned_bytes()),
        if delete_orphaned && !plan.orphaned.is_empty() {
            ", will be deleted"
        } else {
            ""
        }
    );
    if plan.hashes_computed > 0 {
        eprintln!("  Hashes computed: {}", plan.hashes_computed);
    }
    let cloud_only = plan.skipped().count();
    if cloud_only > 0 {
        eprintln!("  Left cloud-only: {} files", cloud_only);
    }
    let unreadable = plan.failures().count();
    if unreadable > 0 {
        eprintln!("  Unreadable items: {}", unreadable);
    }
}

fn print_report(report: &SyncReport) {
    eprintln!();
    if report.cancelled {
        eprintln!("Sync cancelled.");
    } else {
        eprintln!("Sync complete!");
    }
    eprintln!(
        "Summary: {} copied, {} failed, {} deleted, {} delete errors",
        report.files_copied, report.copy_failures, report.files_deleted, report.delete_failures
    );
    if report.hash_failures > 0 {
        eprintln!("Hash refresh errors: {}", report.hash_failures);
    }
    eprintln!("Bytes copied: {}", format_bytes(report.bytes_copied));
    eprintln!(
        "Elapsed: {}",
        CliProgress::format_duration(Duration::from_secs_f64(report.elapsed_secs))
    );
    if report.bytes_copied > 0 {
        eprintln!(
            "Average speed: {}/s",
            format_bytes(report.average_throughput() as u64)
        );
    }
    if report.empty_dirs_removed > 0 {
        eprintln!("Empty folders removed: {}", report.empty_dirs_removed);
    }
    if !report.cache_saved {
        eprintln!("Warning: the hash cache could not be saved");
    }

    if report.has_failures() {
        eprintln!();
        eprintln!("Failed files:");
        for item in report.failures() {
            if let ItemOutcome::Failed { cause, .. } = &item.outcome {
                eprintln!("  {}: {}", item.path.display(), cause);
            }
        }
    }
}

/// Parse and validate command-line arguments, then run the sync
fn main() {
    let args = Args::parse();
    let guard = logging::init_logging(args.verbose, args.log_dir.as_deref());

    let exit_code = match run_cli(&args) {
        Ok(outcome) => outcome.exit_code(),
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    // flush the log file before exiting
    drop(guard);
    std::process::exit(exit_code);
}

/// Merge the config file (if any) with command-line flags.
fn resolve_options(args: &Args) -> Result<SyncOptions, String> {
    let mut options = match &args.config {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => SyncOptions::default(),
    };

    if let Some(name) = &args.hash {
        options.checksum = ChecksumAlgorithm::from_str(name).ok_or_else(|| {
            format!(
                "Invalid hash algorithm '{}'. Must be 'md5', 'sha256', or 'blake3'",
                name
            )
        })?;
    }
    if let Some(cache) = &args.cache {
        options.cache_path = Some(cache.clone());
    }
    if args.no_verify_hashes {
        options.verify_hashes = false;
    }
    if args.no_cloud_aware {
        options.cloud_aware = false;
    }
    if args.cloud_destination {
        options.assume_cloud_destination = true;
    }
    if args.delete_orphaned {
        options.delete_orphaned = true;
    }
    if args.no_recurse {
        options.recurse = false;
    }

    Ok(options)
}

/// Forward worker events to the terminal, then collect the worker's output.
fn drive(handle: WorkerHandle, progress: &CliProgress) -> Result<WorkerOutput, String> {
    for event in handle.events.iter() {
        progress.on_event(&event);
    }
    handle.join().map_err(|e| e.to_string())
}

/// Main CLI logic - separated for testability
fn run_cli(args: &Args) -> Result<RunOutcome, String> {
    let options = resolve_options(args)?;
    let delete_orphaned = options.delete_orphaned;

    let cache_path = options.resolved_cache_path();
    let cache = HashCache::open(&cache_path, options.checksum).map_err(|e| e.to_string())?;

    let job = create_job(&args.src, &args.dst, options).map_err(|e| format!("Job creation failed: {}", e))?;

    let progress = CliProgress::new(args.verbose);

    // Scan and compare
    let output = drive(spawn_analysis(job, cache), &progress)?;
    output
        .result
        .map_err(|e| format!("Analysis failed: {}", e))?;
    let (job, cache) = (output.job, output.cache);

    let Some(plan) = job.plan.as_ref() else {
        return Err("Analysis produced no plan".to_string());
    };
    print_plan(plan, delete_orphaned);

    if args.dry_run {
        if args.json {
            let summary = serde_json::json!({
                "plan_id": plan.id.to_string(),
                "to_copy": plan.to_copy.iter().map(|r| &r.relative_path).collect::<Vec<_>>(),
                "orphaned": plan.orphaned.iter().map(|r| &r.relative_path).collect::<Vec<_>>(),
                "unchanged": plan.to_skip.len(),
                "total_copy_bytes": plan.total_copy_bytes,
            });
            println!("{}", serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?);
        }
        eprintln!("Dry run: nothing was changed.");
        return Ok(if plan.failures().next().is_none() {
            RunOutcome::Success
        } else {
            RunOutcome::ItemFailures
        });
    }

    if !plan.has_work(delete_orphaned) {
        eprintln!("Everything is up to date.");
        return Ok(RunOutcome::Success);
    }
    let scan_failures = plan.failures().count();

    let confirm: Box<dyn ConfirmDeletion + Send> = if args.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(StdinConfirm)
    };

    // Apply the plan
    let output = drive(spawn_execution(job, cache, confirm), &progress)?;
    match output.result {
        Ok(()) => {}
        Err(EngineError::DeletionNotConfirmed { count }) => {
            return Err(format!(
                "Deletion of {} orphaned files was not confirmed; nothing was changed",
                count
            ));
        }
        Err(e) => return Err(format!("Sync failed: {}", e)),
    }

    let Some(report) = output.job.report.as_ref() else {
        return Err("Sync produced no report".to_string());
    };
    print_report(report);

    if args.json {
        let json = serde_json::to_string_pretty(report).map_err(|e| e.to_string())?;
        println!("{}", json);
    }

    if report.has_failures() || scan_failures > 0 {
        Ok(RunOutcome::ItemFailures)
    } else {
        Ok(RunOutcome::Success)
    }
}
