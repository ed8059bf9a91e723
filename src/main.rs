use clap::Parser; // for cli
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use storefront_gateway::{
    app,
    config::Args,
    error::Result,
    load_balancer::{LoadBalancer, health_checker},
    rate_limit::RateLimiter,
    state::AppState,
    telemetry,
    worker::sweeper,
};

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    // parse cli arguments
    let args = Args::parse();
    args.validate()?;

    let load_balancer = Arc::new(LoadBalancer::new(&args.backends)?);
    let limiter = Arc::new(RateLimiter::new(args.build_store(), args.rate_limit_config()));

    let state = Arc::new(AppState {
        client: reqwest::Client::new(),
        limiter: Arc::clone(&limiter),
        load_balancer: Arc::clone(&load_balancer),
        endpoint_scope: args.endpoint_scope,
        trust_forwarded_for: args.trust_forwarded_for,
        max_body_bytes: args.max_body_bytes,
    });

    // spawn the background tasks
    tokio::spawn(health_checker(
        load_balancer,
        reqwest::Client::new(),
        args.health_path.clone(),
        Duration::from_secs(args.health_interval),
    ));
    tokio::spawn(sweeper(limiter, Duration::from_secs(args.sweep_interval)));

    let app = app::router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(addr = %addr, "gateway listening");
    info!(
        max_requests = args.rate_limit,
        window_seconds = args.rate_window,
        store = ?args.store,
        store_path = ?args.store_path,
        on_store_error = ?args.on_store_error,
        endpoint_scope = ?args.endpoint_scope,
        "rate limiting enabled"
    );

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
