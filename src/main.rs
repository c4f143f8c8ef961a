//! Crash Round Server
//!
//! Runs the round supervisor and the WebSocket server until Ctrl-C.
//! Configuration comes from the environment (`CRASH_*`, `AUTH_*`,
//! `RUST_LOG`). Balances and history are kept in memory.

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crash_round::{
    game::{history::InMemoryHistoryStore, ledger::InMemoryLedger},
    network::{AuthConfig, Authenticator, GameServer, ServerConfig},
    Amount, OsSeedSource, RoundSupervisor, SupervisorConfig, VERSION,
};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

/// Opening balance for accounts the in-memory ledger has not seen yet.
fn opening_balance() -> Amount {
    std::env::var("CRASH_DEV_OPENING_BALANCE")
        .ok()
        .and_then(|v| v.parse::<f64>().ok())
        .and_then(Amount::from_decimal)
        .unwrap_or(Amount::from_minor(100_000))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .init();

    info!("Crash Round Server v{}", VERSION);

    let supervisor_config = SupervisorConfig::from_env();
    let server_config = ServerConfig::from_env();
    let auth_config = AuthConfig::from_env();
    if !auth_config.is_configured() && !auth_config.insecure_dev_mode {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set: spectators only");
    }
    let authenticator = Authenticator::new(auth_config).context("invalid auth configuration")?;

    info!(
        betting_window_ms = supervisor_config.round.betting_window.as_millis() as u64,
        flight_ms = supervisor_config.round.flight_duration.as_millis() as u64,
        cooldown_ms = supervisor_config.round.cooldown.as_millis() as u64,
        rtp_bps = supervisor_config.generator.rtp_bps(),
        "Round configuration"
    );

    let ledger = Arc::new(InMemoryLedger::with_opening_balance(opening_balance()));
    let history = Arc::new(InMemoryHistoryStore::default());
    let (supervisor, hub) = RoundSupervisor::new(supervisor_config, Box::new(OsSeedSource), ledger, history);

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let mut engine = tokio::spawn(supervisor.run(shutdown_rx));

    let server = Arc::new(GameServer::new(server_config, hub, authenticator));
    let serving = server.clone();
    let mut transport = tokio::spawn(async move { serving.run().await });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("Ctrl-C received, shutting down");
        }
        result = &mut engine => {
            server.shutdown();
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("round engine stopped"),
                Err(e) => Err(e).context("round engine task panicked"),
            };
        }
        result = &mut transport => {
            let _ = shutdown_tx.send(());
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("server stopped"),
                Err(e) => Err(e).context("server task panicked"),
            };
        }
    }

    server.shutdown();
    let _ = shutdown_tx.send(());

    match engine.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Round engine failed: {}", e),
        Err(e) => error!("Round engine task panicked: {}", e),
    }
    transport.await.context("server task panicked")??;

    info!("Shutdown complete");
    Ok(())
}
