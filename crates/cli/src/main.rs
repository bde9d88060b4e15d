mod jobs;
mod schedule_commands;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    clap::{Parser, Subcommand},
    jobdeck_config::{JobdeckConfig, SchedulerConfig, Severity},
    jobdeck_scheduler::{
        service::{SchedulerOptions, SchedulerService},
        store_sqlite::SqliteStore,
    },
    schedule_commands::SaveArgs,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "jobdeck", about = "Jobdeck: scheduled jobs on SQLite", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./jobdeck.toml and the user config dir).
    #[arg(long, global = true, env = "JOBDECK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until Ctrl-C (default when no subcommand is provided).
    Serve,
    /// List registered job definitions.
    Jobs,
    /// List stored schedules.
    List,
    /// Show the schedule of one job, or its defaults.
    Show { job_id: String },
    /// Create or update a schedule.
    Save(SaveArgs),
    /// Run a job now and wait for the result.
    Trigger {
        job_id: String,
        /// One-off configuration replacing the stored one.
        #[arg(long)]
        config: Option<String>,
    },
    /// Delete a stored schedule.
    Delete { job_id: String },
    /// Recent runs of a job, oldest first.
    Runs {
        job_id: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Scheduler and schedule summary.
    Status,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output on stdout stays valid JSON.
    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn scheduler_options(cfg: &SchedulerConfig) -> SchedulerOptions {
    SchedulerOptions {
        poll_interval: Duration::from_secs(cfg.poll_interval_secs),
        stale_after: Duration::from_secs(cfg.stale_after_secs),
        max_concurrent_jobs: cfg.max_concurrent_jobs,
        output_summary_chars: cfg.output_summary_chars,
        writeback_attempts: cfg.writeback_attempts,
        writeback_backoff: Duration::from_millis(cfg.writeback_backoff_ms),
        history_limit: cfg.history_limit,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<JobdeckConfig> {
    let config = jobdeck_config::load(cli.config.as_deref())?;
    let report = jobdeck_config::validate(&config);
    for diagnostic in &report.diagnostics {
        match diagnostic.severity {
            Severity::Error => tracing::error!(path = %diagnostic.path, "{}", diagnostic.message),
            Severity::Warning => warn!(path = %diagnostic.path, "{}", diagnostic.message),
        }
    }
    if report.has_errors() {
        anyhow::bail!(
            "invalid configuration ({} error(s))",
            report.count(Severity::Error)
        );
    }
    Ok(config)
}

async fn build_service(config: &JobdeckConfig) -> anyhow::Result<Arc<SchedulerService>> {
    let store = SqliteStore::connect(&config.database.url, config.database.max_connections)
        .await
        .with_context(|| format!("opening database {}", config.database.url))?;
    Ok(SchedulerService::new(
        Arc::new(store),
        Arc::new(jobs::builtin_registry()),
        scheduler_options(&config.scheduler),
    ))
}

async fn serve(svc: Arc<SchedulerService>, autostart: bool) -> anyhow::Result<()> {
    if !autostart {
        info!("scheduler.autostart is false, not starting the poll loop");
        return Ok(());
    }

    svc.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown requested, waiting for running jobs");
    svc.stop().await;

    tokio::select! {
        () = svc.wait_idle() => {},
        result = tokio::signal::ctrl_c() => {
            result?;
            warn!(in_flight = svc.status().in_flight, "second interrupt, exiting without draining");
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = load_config(&cli)?;
    let svc = build_service(&config).await?;

    match cli.command {
        None | Some(Commands::Serve) => {
            info!(version = env!("CARGO_PKG_VERSION"), "jobdeck starting");
            serve(svc, config.scheduler.autostart).await
        },
        Some(Commands::Jobs) => schedule_commands::handle_jobs(&svc),
        Some(Commands::List) => schedule_commands::handle_list(&svc).await,
        Some(Commands::Show { job_id }) => schedule_commands::handle_show(&svc, &job_id).await,
        Some(Commands::Save(args)) => schedule_commands::handle_save(&svc, args).await,
        Some(Commands::Trigger { job_id, config }) => {
            schedule_commands::handle_trigger(&svc, &job_id, config).await
        },
        Some(Commands::Delete { job_id }) => {
            schedule_commands::handle_delete(&svc, &job_id).await
        },
        Some(Commands::Runs { job_id, limit }) => {
            schedule_commands::handle_runs(&svc, &job_id, limit).await
        },
        Some(Commands::Status) => schedule_commands::handle_status(&svc).await,
    }
}
