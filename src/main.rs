//! TruthGuard analysis service: binary entrypoint.
//! Boots the Axum HTTP server, wiring config, shared state, and routes.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use truthguard::config::AppConfig;
use truthguard::metrics::Metrics;

/// `RUST_LOG` controls the filter (default `truthguard=info,warn`);
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("truthguard=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // The runtime may have installed a subscriber already; keep it if so.
    let _ = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = AppConfig::from_env()?;
    let (state, ai) = truthguard::build_state(&cfg).await?;

    if std::env::var("AI_STARTUP_CHECK").is_ok_and(|v| v == "1") {
        ai.smoke_check(state.orchestrator.adapter()).await;
    }

    if cfg.embeddings_enabled {
        let orchestrator = std::sync::Arc::clone(&state.orchestrator);
        tokio::spawn(async move {
            if let Err(e) = orchestrator.embedder().warm_up().await {
                tracing::warn!(error = %e, "embedding warm-up failed; will retry on first use");
            }
        });
    }

    let metrics = if cfg.metrics_enabled {
        Some(Metrics::init()?)
    } else {
        None
    };
    let router = truthguard::router(state, metrics.as_ref());

    Ok(router.into())
}
