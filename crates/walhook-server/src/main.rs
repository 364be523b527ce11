//! walhookd - CDC-to-webhook bridge daemon
//!
//! Startup order:
//!
//! 1. load settings from the environment,
//! 2. bootstrap the registry schema,
//! 3. reconcile replica identity / slot / publications once,
//! 4. spawn the periodic reconciler,
//! 5. spawn the replication subscriber and the dispatch pipeline,
//! 6. serve the management API until the process is stopped.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use walhook_cdc::{Subscriber, SubscriberConfig};
use walhook_server::api::{self, ApiState};
use walhook_server::dispatch::{DispatchEngine, PostgresAttemptLog};
use walhook_server::registry::HookStore;
use walhook_server::{db, pipeline, Matcher, Reconciler, Settings};

#[derive(Parser)]
#[command(name = "walhookd")]
#[command(version, about = "PostgreSQL CDC to webhook bridge")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::from_env().context("Failed to load configuration")?;
    info!("Starting walhookd with {:?}", settings);

    let pool = db::create_pool(&settings.database_url)?;
    db::ensure_schema(&pool)
        .await
        .context("Registry schema bootstrap failed")?;

    // Replication config must be in place before the subscriber connects:
    // the slot and publications it asks for are created here.
    let reconciler = Reconciler::new(pool.clone(), &settings);
    reconciler
        .run_once()
        .await
        .context("Initial reconciliation failed")?;
    tokio::spawn(
        reconciler.run_interval(Duration::from_secs(settings.reconcile_interval_secs)),
    );

    let store = HookStore::new(
        pool.clone(),
        settings.schema_names.clone(),
        settings.publication_prefix.clone(),
    );
    let attempt_log = Arc::new(PostgresAttemptLog::new(pool.clone()));
    let engine = Arc::new(DispatchEngine::new(
        attempt_log,
        settings.max_retries,
        Duration::from_millis(settings.retry_delay_ms),
    )?);
    let matcher = Matcher::new(store.clone());

    let subscriber_config = SubscriberConfig::builder()
        .connection_string(&settings.database_url)
        .slot_name(&settings.slot_name)
        .publications(settings.publication_names())
        .build()?;
    let mut subscriber = Subscriber::new(subscriber_config);
    let events = subscriber
        .take_event_receiver()
        .ok_or_else(|| anyhow!("Event receiver already taken"))?;
    subscriber.subscribe()?;
    tokio::spawn(pipeline::run(events, matcher, engine));

    let state = ApiState {
        store,
        pool,
        api_key: Arc::new(settings.api_key.clone()),
    };
    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Could not bind {}", addr))?;
    info!("Management API listening on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
