use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use common_audit::AuditRecorder;
use common_observability::ServiceMetrics;
use sqlx::postgres::PgPoolOptions;
use sqlx::Executor;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use aims_service::{app::build_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let max_connections: u32 = env::var("DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(10);
    // Short lock waits: a contended transition should fail fast with a
    // concurrency conflict rather than hang the request.
    let lock_timeout_ms: i64 = env::var("AIMS_LOCK_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(2000);

    let db = PgPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(move |conn, _meta| {
            Box::pin(async move {
                let sql = format!("SET lock_timeout = {lock_timeout_ms}");
                conn.execute(sql.as_str()).await?;
                Ok(())
            })
        })
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;

    // Ensure database schema is up to date before serving traffic
    sqlx::migrate!("./migrations").run(&db).await?;

    let state = AppState {
        audit: Arc::new(AuditRecorder::new(db.clone())),
        metrics: Arc::new(ServiceMetrics::new()),
        db,
    };
    let app = build_router(state);

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8086);
    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::from((ip, port));
    info!(%addr, "starting aims-service");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
