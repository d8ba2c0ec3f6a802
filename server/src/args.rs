use std::net::SocketAddr;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
pub struct Args {
    /// Path to the `.sqlite` file used to store control plane state
    #[clap(long, default_value = "./zane.sqlite")]
    pub state: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Start(StartCommand),
}

#[derive(clap::Args, Debug, Clone)]
pub struct StartCommand {
    /// Address to bind the internal control surface to
    #[clap(long, default_value = "127.0.0.1:8080")]
    pub control: SocketAddr,
    /// Docker/swarm socket to connect to, e.g. `unix:///var/run/docker.sock`.
    /// Left unset to use bollard's local defaults (`DOCKER_HOST` or the
    /// platform socket).
    #[clap(long)]
    pub docker_host: Option<String>,
    /// Prefix added to the name of every docker resource this process manages
    #[clap(long, default_value = "zane")]
    pub resource_prefix: String,
    /// Base URL of the reverse-proxy admin API
    #[clap(long, default_value = "http://proxy:2019")]
    pub proxy_admin_url: String,
    /// Bearer token presented to the proxy admin API, if it requires one
    #[clap(long)]
    pub proxy_admin_token: Option<String>,
    /// Base URL the log sink forwards structured log events to
    #[clap(long)]
    pub log_sink_url: Option<String>,
    /// Root domain new preview/deployment URLs are generated under
    #[clap(long, default_value = "zane.local")]
    pub root_domain: String,
    /// Token presented when cloning private git repositories
    #[clap(long)]
    pub git_token: Option<String>,
    /// Internal hostname of this process's own control surface, dialled by
    /// per-deployment preview routes to gate them behind a logged-in session
    #[clap(long, default_value = "control.zane.local")]
    pub frontend_internal_hostname: String,
    /// Default image used for deployments that don't specify one
    #[clap(long, default_value = "docker.io/library/nginx:latest")]
    pub default_image: String,
    /// Maximum number of deployment workflows driven concurrently
    #[clap(long, default_value_t = 8)]
    pub worker_concurrency: usize,
    /// Health monitor tick interval, in seconds
    #[clap(long, default_value_t = 10)]
    pub health_tick_seconds: u64,
}
