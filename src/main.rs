use anyhow::Context;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use vipscan::handlers;
use vipscan::state::{load_templates, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("vipscan=info,tower_http=info")),
        )
        .with_target(false)
        .compact()
        .init();

    let config = Config::from_env();
    info!(
        "Configuration: bind={}, place_id={}, store={}, rate_limit_delay={}ms, timeout={}s",
        config.bind_address,
        config.place_id,
        config.store_path,
        config.rate_limit_delay.as_millis(),
        config.request_timeout.as_secs()
    );

    let tera = load_templates("templates/**/*.html")?;
    let state = Arc::new(AppState::from_config(&config, tera).context("building application")?);

    // Startup runs in the background so the dashboard is reachable at once.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move { state.engine.startup().await });
    }

    let scheduler = JobScheduler::new()
        .await
        .context("creating scheduler")?;
    let job_state = Arc::clone(&state);
    let job = Job::new_async(config.totals_refresh_cron.as_str(), move |_uuid, _lock| {
        let state = Arc::clone(&job_state);
        Box::pin(async move {
            if state.engine.is_walking() {
                info!("Scheduled totals refresh skipped, a walk is running");
                return;
            }
            if state.engine.load_cached_totals().is_none() {
                state.engine.refresh_totals(false).await;
            }
        })
    })
    .context("invalid TOTALS_REFRESH_CRON")?;
    scheduler.add(job).await.context("scheduling totals refresh")?;
    scheduler.start().await.context("starting scheduler")?;
    info!("Totals refresh scheduled: {}", config.totals_refresh_cron);

    let app = handlers::router(state)
        .nest_service("/static", ServeDir::new("static"))
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("binding {}", config.bind_address))?;
    info!("Listening on http://{}", listener.local_addr()?);
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "server error");
    }
    Ok(())
}
