//! Wallet ledger HTTP server.
//!
//! Configuration comes from the environment: `DATABASE_URL`, `BIND_ADDR`
//! and `SEED_DEMO=1` to create a demo asset with a funded system wallet.

use std::error::Error;
use std::sync::Arc;

use wallet_ledger::adapters::PostgresStore;
use wallet_ledger::http::{router, AppState};
use wallet_ledger::{Amount, Asset};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgres://localhost/wallet_ledger".to_string());
    let store = PostgresStore::connect(&database_url).await?;
    store.init_schema().await?;
    tracing::info!("schema ready");

    let state = AppState::new(Arc::new(store));

    if std::env::var("SEED_DEMO").as_deref() == Ok("1") {
        seed_demo(&state).await?;
    }

    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "wallet ledger listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

/// Idempotent demo seed: a GOLD asset and its system wallet holding the
/// initial float. Safe to run on every boot.
async fn seed_demo(state: &AppState) -> Result<(), Box<dyn Error>> {
    use wallet_ledger::LedgerError;

    match state.assets().get_asset("gold").await {
        Ok(_) => return Ok(()),
        Err(LedgerError::AssetNotFound(_)) => {}
        Err(err) => return Err(err.into()),
    }

    state
        .assets()
        .create_asset(Asset::new("gold", "Gold coins", 0))
        .await?;
    let wallet = state
        .wallets()
        .create_system_wallet("gold", Amount::from(1_000_000_000))
        .await?;
    tracing::info!(system_wallet = %wallet.id, "demo seed created");
    Ok(())
}
