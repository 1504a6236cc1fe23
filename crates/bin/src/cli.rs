//! CLI argument definitions for the permsync binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Grafana permission sync service
#[derive(Parser, Debug)]
#[command(name = "permsync")]
#[command(about = "Keeps Grafana organization roles in line with directory group membership")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sync scheduler and HTTP server
    Serve(ServeArgs),
    /// Build the group tree once and print the reconcile plan without applying it
    Plan(PlanArgs),
    /// Check readiness of a running permsync server
    Health(HealthArgs),
}

/// Arguments for the serve command
#[derive(clap::Args, Debug)]
pub struct ServeArgs {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "PERMSYNC_CONFIG")]
    pub config: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value_t = 3000, env = "PERMSYNC_PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0", env = "PERMSYNC_HOST")]
    pub host: String,
}

/// Arguments for the plan command
#[derive(clap::Args, Debug)]
pub struct PlanArgs {
    /// Path to the JSON configuration file
    #[arg(short, long, env = "PERMSYNC_CONFIG")]
    pub config: PathBuf,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the health command
#[derive(clap::Args, Debug)]
pub struct HealthArgs {
    /// Port of the server to check
    #[arg(short, long, default_value_t = 3000, env = "PERMSYNC_PORT")]
    pub port: u16,

    /// Host of the server to check
    #[arg(long, default_value = "127.0.0.1", env = "PERMSYNC_HOST")]
    pub host: String,

    /// Timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    pub timeout: u64,
}
