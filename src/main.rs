//! reliefweb-import - reconciles documents from external humanitarian data
//! APIs into ReliefWeb.
//!
//! # Usage
//!
//! - `reliefweb-import` serves the HTTP API
//! - `reliefweb-import run <importer>` runs one importer once and exits
//!
//! # API Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /importers` - Configured importers
//! - `POST /importers/:name/run` - Run an importer
//! - `GET /importers/:name/records` - Import records of an importer
//!
//! Configuration is read from `RWIMPORT_*` environment variables, see
//! [`reliefweb_import::config`].

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, bail};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use reliefweb_import::api::{self, AppState};
use reliefweb_import::config::AppConfig;
use reliefweb_import::data_sources::build_adapter;
use reliefweb_import::reconcile::Reconciler;
use reliefweb_import::storage::Storage;
use reliefweb_import::submitter::HttpSubmitter;
use reliefweb_import::taxonomy::Taxonomy;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("reliefweb_import=info".parse()?))
        .init();

    let config = AppConfig::from_env()?;
    info!(
        port = config.port,
        db_url = %config.database_url,
        importers = config.sources.len(),
        "Configuration loaded"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let taxonomy = Arc::new(Taxonomy::reliefweb()?);
    let submitter = Arc::new(HttpSubmitter::new(&config.submitter)?);
    let reconciler = Reconciler::new(storage, submitter, taxonomy);

    let args: Vec<String> = env::args().skip(1).collect();
    match args.as_slice() {
        [] => serve(&config, reconciler).await,
        [command, name] if command == "run" => run_once(&config, reconciler, name).await,
        _ => bail!("usage: reliefweb-import [run <importer>]"),
    }
}

/// Run one importer once, failing on a run-level error.
async fn run_once(config: &AppConfig, reconciler: Reconciler, name: &str) -> anyhow::Result<()> {
    let settings = config
        .source(name)
        .with_context(|| format!("importer '{name}' is not configured"))?;
    let adapter = build_adapter(settings)?;

    let summary = reconciler.run(adapter.as_ref()).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

async fn serve(config: &AppConfig, reconciler: Reconciler) -> anyhow::Result<()> {
    let adapters = config
        .sources
        .iter()
        .map(build_adapter)
        .collect::<Result<Vec<_>, _>>()?;

    let state = AppState::new(reconciler, adapters);
    let app = api::router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "reliefweb-import is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
