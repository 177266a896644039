mod app;
mod auth;
mod config;
mod db;
mod error;
mod mail;
mod rate_limit;
mod state;
mod users;

use crate::{config::AppConfig, state::AppState};

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "accounts=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

/// A panic means a broken invariant; log it and take the process down.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        tracing::error!(%location, panic = %info, "unrecoverable error, shutting down");
        std::process::exit(1);
    }));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    install_panic_hook();

    let config = AppConfig::from_env()?;
    tracing::info!(environment = ?config.environment, "starting accounts service");

    let pool = db::connect(&config).await?;
    db::migrate(&pool).await?;

    let state = AppState::init(pool, config)?;
    app::serve(app::build_app(state)).await
}
