use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the namewright binary.
#[derive(Debug, Parser)]
#[command(
    name = "namewright",
    version,
    about = "Cache invalidation and propagation engine for generated naming strings"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "NAMEWRIGHT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP surface, the propagation workers and the pending-job sweeper.
    Serve(Box<ServeArgs>),
    /// Create a retry job for a finished propagation job.
    Retry(RetryArgs),
    /// Request cancellation of a pending or running propagation job.
    Cancel(CancelArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct RetryArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Job to retry.
    #[arg(value_name = "JOB_ID")]
    pub job_id: Uuid,

    /// Retry only strings with unresolved errors.
    #[arg(long = "failed-only", action = clap::ArgAction::SetTrue)]
    pub failed_only: bool,
}

#[derive(Debug, Args, Clone)]
pub struct CancelArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Job to cancel.
    #[arg(value_name = "JOB_ID")]
    pub job_id: Uuid,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the catalog cache backend (memory|postgres).
    #[arg(long = "cache-backend", value_name = "BACKEND")]
    pub cache_backend: Option<String>,

    /// Override the catalog cache entry lifetime.
    #[arg(long = "cache-ttl-seconds", value_name = "SECONDS")]
    pub cache_ttl_seconds: Option<u64>,

    /// Override the number of propagation workers.
    #[arg(long = "propagation-workers", value_name = "COUNT")]
    pub propagation_workers: Option<u32>,

    /// Override the pending-job sweep schedule (cron, with a seconds field).
    #[arg(long = "propagation-sweep-schedule", value_name = "CRON")]
    pub propagation_sweep_schedule: Option<String>,
}
