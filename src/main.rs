//! fEMR On-Chain service
//!
//! Starts the HTTP API, the export workers and the encounter closer.

use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::EnvFilter;

use femr::api::{self, AppState};
use femr::config;
use femr::db::Database;
use femr::export::ExportContext;
use femr::jobs::{self, ExportQueue};
use femr::notify::Mailer;
use femr::storage::ExportStorage;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FEMR_LOG_JSON").map(|v| v == "1").unwrap_or(false);
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let settings = config::load_config().context("failed to load configuration")?;

    let database = Database::connect(&settings.database.url, settings.database.max_connections)
        .await
        .context("failed to connect to database")?;
    database
        .run_migrations()
        .await
        .context("failed to run database migrations")?;

    let storage = ExportStorage::new(&settings.storage.export_dir);
    let mailer = Mailer::from_config(settings.mail.as_ref())?;
    if mailer.is_none() {
        info!("mail relay not configured, export notices stay in-app");
    }

    let (queue, _workers) = ExportQueue::start(
        ExportContext {
            db: database.clone(),
            storage: storage.clone(),
            mailer,
        },
        settings.jobs.export_workers,
        settings.jobs.queue_capacity,
    );
    let _closer = jobs::spawn_encounter_closer(
        database.clone(),
        Duration::from_secs(settings.jobs.encounter_close_interval_secs.max(1)),
    );

    let state = web::Data::new(AppState {
        db: database,
        storage,
        queue,
        auth: settings.auth.clone(),
    });

    let address = format!("{}:{}", settings.server.host, settings.server.port);
    info!(%address, "starting HTTP server");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(TracingLogger::default())
            .configure(api::configure)
    })
    .bind(&address)
    .with_context(|| format!("failed to bind {}", address))?
    .run()
    .await?;

    Ok(())
}
