mod api;
mod greenery;
mod schemas;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use grona_core::prelude::*;
use tokio::signal;
use tracing::info;

use greenery::GreeneryClient;

#[derive(Debug, Clone)]
pub struct ServerCfg {
    pub bind: String,
    pub snapshot_path: String,
    pub feed_base_url: String,
    pub greenery_base_url: String,
    pub request_deadline_s: u64,
    pub planner: PlannerConfig,
}

impl Default for ServerCfg {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".into(),
            snapshot_path: "data/snapshot.json".into(),
            feed_base_url: "https://transport.integration.sl.se/v1".into(),
            greenery_base_url: "http://127.0.0.1:8000".into(),
            request_deadline_s: 120,
            planner: PlannerConfig::default(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = cfg_from_env();

    info!("loading spatial snapshot: {}", cfg.snapshot_path);
    let store = MemoryStore::from_snapshot_file(&cfg.snapshot_path, cfg.planner.db_pool_size)?;
    let feed = HttpTransitFeed::new(
        &cfg.feed_base_url,
        Duration::from_millis(cfg.planner.feed_timeout_ms),
    )?;
    let planner = Arc::new(RoutePlanner::new(store, feed, cfg.planner.clone()));
    let greenery = GreeneryClient::new(&cfg.greenery_base_url)?;

    let state = api::AppState {
        planner,
        greenery,
        request_deadline: Duration::from_secs(cfg.request_deadline_s),
    };
    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&cfg.bind).await?;
    info!("listening on http://{}", cfg.bind);
    tokio::select! {
        served = axum::serve(listener, app) => { served?; },
        _ = signal::ctrl_c() => { info!("shutdown signal received"); }
    }

    Ok(())
}

fn cfg_from_env() -> ServerCfg {
    let mut cfg = ServerCfg::default();
    if let Ok(v) = env::var("BIND") {
        cfg.bind = v;
    }
    if let Ok(v) = env::var("SNAPSHOT_PATH") {
        cfg.snapshot_path = v;
    }
    if let Ok(v) = env::var("TRANSIT_FEED_URL") {
        cfg.feed_base_url = v;
    }
    if let Ok(v) = env::var("GREENERY_URL") {
        cfg.greenery_base_url = v;
    }
    if let Ok(v) = env::var("REQUEST_DEADLINE_S") {
        cfg.request_deadline_s = v.parse().unwrap_or(cfg.request_deadline_s);
    }
    if let Ok(v) = env::var("WALKING_SPEED") {
        cfg.planner.walking_speed = v.parse().unwrap_or(cfg.planner.walking_speed);
    }
    if let Ok(v) = env::var("API_DELAY_MS") {
        cfg.planner.api_delay_ms = v.parse().unwrap_or(cfg.planner.api_delay_ms);
    }
    if let Ok(v) = env::var("DB_POOL_SIZE") {
        cfg.planner.db_pool_size = v.parse().unwrap_or(cfg.planner.db_pool_size);
    }
    if let Ok(v) = env::var("MAX_WALKING_TIME") {
        cfg.planner.max_walking_time = v.parse().unwrap_or(cfg.planner.max_walking_time);
    }
    if let Ok(v) = env::var("TRANSFER_MARGIN") {
        cfg.planner.transfer_margin = v.parse().unwrap_or(cfg.planner.transfer_margin);
    }
    cfg
}
