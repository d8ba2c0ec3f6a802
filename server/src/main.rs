mod args;
mod control;
mod log_sink;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tracing::{info, trace};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zane_docker::{BollardDriver, DriverSettings};
use zane_orchestrator::{HealthMonitor, Persistence, SemaphoreRegistry};
use zane_proxy::ProxyAdminClient;

use args::{Args, Commands};
use control::AppState;
use log_sink::HttpLogSink;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let start = match args.command {
        Commands::Start(start) => start,
    };

    let http_client = reqwest::Client::new();
    let log_sink = Arc::new(HttpLogSink::spawn(http_client.clone(), start.log_sink_url.clone()));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).unwrap())
        .with(fmt::layer())
        .with(zane_common::log::LogSinkLayer::new(log_sink.clone()))
        .init();

    trace!(start = ?start, "parsed args");

    if let Some(docker_host) = &start.docker_host {
        std::env::set_var("DOCKER_HOST", docker_host);
    }

    let database_url = format!("sqlite://{}?mode=rwc", args.state);
    let persistence = Persistence::connect(&database_url).await?;

    let driver_settings = DriverSettings::builder().prefix(&start.resource_prefix).build();
    let driver: Arc<dyn zane_docker::ContainerDriver> = Arc::new(BollardDriver::connect_local(driver_settings)?);

    let proxy_http = match &start.proxy_admin_token {
        Some(token) => {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
            reqwest::Client::builder().default_headers(headers).build()?
        }
        None => reqwest::Client::new(),
    };
    let proxy = ProxyAdminClient::new(proxy_http, start.proxy_admin_url.clone());

    let state = Arc::new(AppState::new(
        persistence.clone(),
        Arc::clone(&driver),
        proxy,
        SemaphoreRegistry::new(),
        log_sink,
        http_client.clone(),
        start.root_domain.clone(),
        start.git_token.clone(),
        start.frontend_internal_hostname.clone(),
    ));

    let monitor = Arc::new(HealthMonitor::new(persistence, Arc::clone(&driver), http_client));
    let monitor_handle = tokio::spawn(monitor.run(Duration::from_secs(start.health_tick_seconds)));

    info!(addr = %start.control, "starting control surface");
    let app = control::router(Arc::clone(&state));
    let server_handle = tokio::spawn(axum::Server::bind(&start.control).serve(app.into_make_service()));

    let _ = tokio::join!(monitor_handle, server_handle);

    Ok(())
}
