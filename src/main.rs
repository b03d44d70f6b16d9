use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use appmax_recon::appmax::AppmaxClient;
use appmax_recon::auth::SessionKeys;
use appmax_recon::config::{Config, StoreBackend};
use appmax_recon::metrics::Metrics;
use appmax_recon::reconcile::SignaturePolicy;
use appmax_recon::store::{InMemoryStore, Stores};
use appmax_recon::{db, router, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,appmax_recon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cfg = Config::from_env()?;
    tracing::info!(store = ?cfg.store, gateway = ?cfg.appmax, "config loaded");

    let (stores, pool) = match cfg.store {
        StoreBackend::Postgres => {
            let url = cfg.database_url.as_deref().ok_or("DATABASE_URL is required")?;
            let pool = db::create_pool(url, cfg.db_max_connections).await?;
            db::run_migrations(&pool).await?;
            tracing::info!("db connected + migrations applied");
            (Stores::postgres(pool.clone()), Some(pool))
        }
        StoreBackend::Memory => {
            tracing::warn!("running on in-memory stores; nothing survives a restart");
            (Stores::shared(Arc::new(InMemoryStore::new())), None)
        }
    };

    if cfg.appmax.webhook_secret.is_none() {
        tracing::warn!("APPMAX_WEBHOOK_SECRET not set; webhooks are accepted unsigned");
    }

    let appmax = match AppmaxClient::new(cfg.appmax.clone()) {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::warn!(error = %err, "gateway client disabled; refunds will fail with CONFIG_ERROR");
            None
        }
    };

    let sessions = cfg.admin_session_secret.as_deref().map(SessionKeys::from_secret);
    if sessions.is_none() {
        tracing::warn!("ADMIN_SESSION_SECRET not set; admin routes will reject every request");
    }

    let policy = SignaturePolicy {
        secret: cfg.appmax.webhook_secret.clone(),
        tolerance_secs: cfg.appmax.webhook_tolerance_secs,
    };

    let state = AppState::new(stores, policy, appmax, sessions, Metrics::new()?, pool);
    let app = router(state);

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
