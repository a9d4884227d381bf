use clap::{Parser, Subcommand};
use futures::future::join_all;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use nodenexus_jobs::config::AppConfig;
use nodenexus_jobs::dispatch::{Dispatcher, RunRecord};
use nodenexus_jobs::executor::ShellExecutor;
use nodenexus_jobs::inventory::{NodeInventory, resolve_targets};
use nodenexus_jobs::job::{
    JobDefinition, OptionValues, TriggerKind, load_file, load_record, validate, validate_all,
};
use nodenexus_jobs::plan::plan_with_options;
use nodenexus_jobs::store::{JobStore, StoreError};
use nodenexus_jobs::{JobError, VERSION, logging};

#[derive(Parser, Debug)]
#[command(author, version, about = "Load, validate, plan and run node jobs", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of job files, overrides the configuration
    #[arg(long)]
    jobs_dir: Option<PathBuf>,

    /// Node inventory file, overrides the configuration
    #[arg(long)]
    inventory: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Parse and validate job files
    Validate {
        files: Vec<PathBuf>,
        /// Report every violation instead of the first one
        #[arg(long)]
        all_errors: bool,
    },
    /// Show the nodes a job would run on, in rank order
    Targets { job: String },
    /// Show the ordered steps of a job
    Plan {
        job: String,
        /// Option value for this run, repeatable
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
        options: Vec<(String, String)>,
        #[arg(long)]
        json: bool,
    },
    /// Run jobs now
    Run {
        #[arg(required = true)]
        jobs: Vec<String>,
        /// Option value passed to every listed job, repeatable
        #[arg(short = 'o', long = "option", value_name = "KEY=VALUE", value_parser = parse_option)]
        options: Vec<(String, String)>,
        /// Apply the schedule gate instead of the manual one
        #[arg(long)]
        scheduled: bool,
        /// Print one line per node instead of the full output
        #[arg(long, conflicts_with = "json")]
        summary: bool,
        #[arg(long)]
        json: bool,
        /// Repeat the run every SECS seconds until interrupted
        #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
        every: Option<u64>,
    },
    /// List the jobs in the jobs directory
    List,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Report {
    Full,
    Summary,
    Json,
}

fn parse_option(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err("expected KEY=VALUE".to_string()),
    }
}

/// A job argument is a path to a job file, `<file>#<id>` for one record of a
/// multi-record file, or the id of a job in the jobs directory.
fn resolve_job(job: &str, store: &JobStore) -> Result<JobDefinition, JobError> {
    let (path, id) = match job.rsplit_once('#') {
        Some((file, id)) if Path::new(file).is_file() => (Path::new(file), Some(id)),
        _ => (Path::new(job), None),
    };
    if path.is_file() {
        return Ok(load_record(path, id)?);
    }
    store
        .get(job)
        .map(|def| (*def).clone())
        .ok_or_else(|| StoreError::NotFound(job.to_string()).into())
}

fn open_store(config: &AppConfig) -> JobStore {
    let store = JobStore::new();
    match store.load_dir(&config.jobs_dir) {
        Ok(report) => {
            for failure in &report.failures {
                error!(error = %failure, "Job not loaded.");
            }
        }
        Err(e) => info!(error = %e, "No job directory loaded."),
    }
    store
}

fn status_line(record: &RunRecord) -> String {
    format!(
        "{} [{}]: {} ({} step(s), {} failure(s), {} not attempted)",
        record.job_name,
        record.run_id,
        record.status,
        record.steps.len(),
        record.errors.len(),
        record.not_attempted.len()
    )
}

fn print_run(record: &RunRecord) {
    for node in record.nodes() {
        println!("== {node} ==");
        println!("{}", record.combined_output(node));
    }
    for failure in &record.errors {
        println!("! {failure}");
    }
    println!("{}", status_line(record));
}

fn print_summary(record: &RunRecord) {
    println!("===== {} at {} =====", record.job_name, record.started_at.to_rfc3339());
    for node in record.node_summaries() {
        let state = if node.succeeded() { "OK" } else { "FAILED" };
        println!(
            "{:<32} {:<6} {} step(s), {} failure(s), {} not attempted",
            node.node,
            state,
            node.steps,
            node.failures.len(),
            node.not_attempted
        );
    }
    println!("{}", status_line(record));
}

async fn run_jobs(
    dispatcher: &Dispatcher,
    defs: &[JobDefinition],
    inventory: &NodeInventory,
    kind: TriggerKind,
    options: &OptionValues,
    report: Report,
) -> Result<bool, Box<dyn Error>> {
    let results = join_all(
        defs.iter()
            .map(|def| dispatcher.trigger_with_options(def, inventory, kind, options)),
    )
    .await;

    let mut ok = true;
    for result in results {
        match result {
            Ok(record) => {
                ok &= record.succeeded();
                match report {
                    Report::Full => print_run(&record),
                    Report::Summary => print_summary(&record),
                    Report::Json => println!("{}", serde_json::to_string_pretty(&record)?),
                }
            }
            Err(e) => {
                error!(error = %e, "Run not started.");
                println!("{e}");
                ok = false;
            }
        }
    }
    Ok(ok)
}

fn validate_files(files: &[PathBuf], all_errors: bool) -> bool {
    let mut ok = true;
    for path in files {
        let defs = match load_file(path) {
            Ok(defs) => defs,
            Err(e) => {
                println!("{}: {e}", path.display());
                ok = false;
                continue;
            }
        };
        for def in defs {
            let violations = if all_errors {
                validate_all(&def).err().unwrap_or_default()
            } else {
                validate(&def).err().into_iter().collect()
            };
            if violations.is_empty() {
                println!("{}: `{}` ok", path.display(), def.id);
            }
            for violation in &violations {
                println!("{}: `{}` {violation}", path.display(), def.id);
            }
            ok &= violations.is_empty();
        }
    }
    ok
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(dir) = args.jobs_dir {
        config.jobs_dir = dir;
    }
    if let Some(path) = args.inventory {
        config.inventory_path = path;
    }
    if args.debug {
        config.logging.filter = Some("debug".to_string());
    }
    logging::init_logging(&config.logging);
    info!("Starting jobctl, version: {}", VERSION);
    config.log_source();

    let ok = match args.command {
        Cmd::Validate { files, all_errors } => validate_files(&files, all_errors),
        Cmd::List => {
            for def in open_store(&config).list() {
                let schedule = def
                    .schedule
                    .as_ref()
                    .map(|s| s.crontab.as_str())
                    .unwrap_or("-");
                println!(
                    "{:<38} {:<32} exec={} sched={} {}",
                    def.id,
                    def.display_name(),
                    def.execution_enabled,
                    def.schedule_enabled,
                    schedule
                );
            }
            true
        }
        Cmd::Targets { job } => {
            let store = open_store(&config);
            let def = resolve_job(&job, &store)?;
            let inventory = NodeInventory::load(&config.inventory_path)?;
            for node in resolve_targets(&def, &inventory)? {
                println!("{}\t{}", node.nodename, node.host());
            }
            true
        }
        Cmd::Plan { job, options, json } => {
            let store = open_store(&config);
            let def = resolve_job(&job, &store)?;
            validate(&def)?;
            let inventory = NodeInventory::load(&config.inventory_path)?;
            let supplied: OptionValues = options.into_iter().collect();
            let plan = plan_with_options(&def, resolve_targets(&def, &inventory)?, &supplied)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&plan.describe())?);
            } else {
                for (position, step) in plan.describe().iter().enumerate() {
                    println!("{:>3}. {} #{} {}", position + 1, step.node, step.command_index, step.command);
                }
            }
            true
        }
        Cmd::Run {
            jobs,
            options,
            scheduled,
            summary,
            json,
            every,
        } => {
            let store = open_store(&config);
            let inventory = NodeInventory::load(&config.inventory_path)?;
            let dispatcher = Dispatcher::new(Arc::new(ShellExecutor::from_config(&config.executor)));
            let kind = if scheduled {
                TriggerKind::Scheduled
            } else {
                TriggerKind::Manual
            };
            let report = if json {
                Report::Json
            } else if summary {
                Report::Summary
            } else {
                Report::Full
            };
            let supplied: OptionValues = options.into_iter().collect();
            let defs = jobs
                .iter()
                .map(|job| resolve_job(job, &store))
                .collect::<Result<Vec<_>, _>>()?;

            match every {
                None => run_jobs(&dispatcher, &defs, &inventory, kind, &supplied, report).await?,
                Some(secs) => {
                    info!(interval_secs = secs, "Repeating runs until interrupted.");
                    let mut ticker = tokio::time::interval(Duration::from_secs(secs));
                    let interrupt = tokio::signal::ctrl_c();
                    tokio::pin!(interrupt);
                    loop {
                        tokio::select! {
                            biased;
                            _ = &mut interrupt => {
                                info!("Stopped by interrupt.");
                                break true;
                            }
                            _ = ticker.tick() => {
                                let ok = run_jobs(&dispatcher, &defs, &inventory, kind, &supplied, report).await?;
                                if !ok {
                                    error!("Run finished with failures, repeating.");
                                }
                            }
                        }
                    }
                }
            }
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
