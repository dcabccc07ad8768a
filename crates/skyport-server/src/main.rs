use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod middleware;
mod state;

use config::AppConfig;
use middleware::{rate_limit_uploads, RateLimiter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyport_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting skyport server");

    let config = AppConfig::load()?;
    let api_state = state::build_state(&config).await?;
    info!("connected to metadata, cache, and blob stores");

    let redis_client = redis::Client::open(config.redis.url.as_str())?;
    let rate_limiter = Arc::new(RateLimiter::new(
        redis_client.get_tokio_connection_manager().await?,
        config.rate_limit.upload_max_requests,
        config.rate_limit.upload_window_seconds,
    ));

    let app = skyport_api::build_router(api_state)
        .layer(from_fn_with_state(rate_limiter, rate_limit_uploads))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_seconds))),
        );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;

    Ok(())
}
