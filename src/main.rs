//! deriv_trader - Main Entry Point
//!
//! Connects to Deriv, authorizes, streams ticks for one symbol and runs the
//! strategy engine. Console commands: `start`, `stop`, `status`, `abandon`,
//! `quit`.

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use deriv_trader::common::channels::create_command_channel;
use deriv_trader::config::load_config;
use deriv_trader::liveness::{self, LivenessState};
use deriv_trader::{
    AppConfig, ClientError, DerivSession, DerivTransport, EngineCommand, RunExit,
    StrategyEngine, TickStream, TradeGateway, TransportOptions,
};

/// Longest wait between reconnection attempts
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(300);

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Start trading without waiting for a `start` command
    #[arg(long)]
    auto_start: bool,

    /// Instrument to trade, overrides the configured symbol
    #[arg(long, env = "DERIV_SYMBOL")]
    symbol: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let mut config = load_config(Some(&args.config))?;
    if let Some(symbol) = &args.symbol {
        config.deriv.symbol = symbol.clone();
    }
    if args.auto_start {
        config.trading.auto_start = true;
    }

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    init_logging(&level, args.json_logs)?;

    info!("Starting deriv_trader");
    info!("Configuration file: {}", args.config);

    let token = config
        .deriv
        .api_token
        .clone()
        .filter(|token| !token.trim().is_empty())
        .ok_or_else(|| anyhow!("DERIV_API_TOKEN is not set"))?;

    let liveness_state = LivenessState::new();
    if config.settings.liveness_port != 0 {
        if let Err(e) = liveness::spawn(config.settings.liveness_port, liveness_state.clone()).await {
            warn!("Liveness endpoint unavailable: {}", e);
        }
    }

    let (command_tx, mut command_rx) = create_command_channel();
    spawn_console(command_tx);

    let mut engine_slot: Option<StrategyEngine> = None;
    let mut attempt: u32 = 0;

    loop {
        match open_session(&config, &token).await {
            Ok((session, mut ticks)) => {
                attempt = 0;
                liveness_state.set_connected(true);

                let gateway: Arc<dyn TradeGateway> = session.clone();
                let engine = match engine_slot.take() {
                    Some(mut engine) => {
                        engine.set_gateway(gateway);
                        engine
                    }
                    None => {
                        let mut fresh =
                            StrategyEngine::from_config(gateway, &config.deriv, &config.trading)?;
                        if config.trading.auto_start {
                            fresh.start();
                        } else {
                            info!("Strategy loaded. Type \"start\" to begin.");
                        }
                        fresh
                    }
                };
                let engine = engine_slot.insert(engine);

                let exit = tokio::select! {
                    exit = engine.run(&mut ticks, &mut command_rx) => exit,
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received shutdown signal, cleaning up...");
                        RunExit::Shutdown
                    }
                };

                liveness_state.set_connected(false);
                session.transport().disconnect().await;
                if exit == RunExit::Shutdown {
                    break;
                }
                warn!("Tick stream ended, reconnecting");
            }
            Err(ClientError::Auth(e)) => {
                error!("Authorization failed: {}", e);
                return Err(e.into());
            }
            Err(e) => {
                warn!("Connection attempt failed: {}", e);
            }
        }

        attempt += 1;
        let max_attempts = config.settings.max_reconnect_attempts;
        if max_attempts > 0 && attempt > max_attempts {
            if let Some(engine) = engine_slot.as_mut() {
                engine.halt("connection lost");
            }
            bail!("Giving up after {} reconnection attempts", max_attempts);
        }

        let delay = reconnect_delay(config.settings.reconnect_delay_ms, attempt);
        info!("Reconnecting in {:?} (attempt {})", delay, attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, cleaning up...");
                break;
            }
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Connect, authorize and subscribe to the configured symbol
async fn open_session(
    config: &AppConfig,
    token: &str,
) -> std::result::Result<(Arc<DerivSession<DerivTransport>>, TickStream), ClientError> {
    let transport = DerivTransport::connect(
        &config.deriv.websocket_url,
        &config.deriv.app_id,
        TransportOptions::from_settings(&config.settings),
    )
    .await?;

    let session = Arc::new(DerivSession::new(Arc::new(transport)));
    session.authorize(token).await?;
    let ticks = session.subscribe_ticks(&config.deriv.symbol).await?;
    Ok((session, ticks))
}

/// Read console commands from stdin
fn spawn_console(commands: mpsc::Sender<EngineCommand>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<EngineCommand>() {
                Ok(command) => {
                    if commands.send(command).await.is_err() {
                        break;
                    }
                }
                Err(message) => warn!("{}", message),
            }
        }
    });
}

/// Exponential backoff from the configured base delay
fn reconnect_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor)).min(MAX_RECONNECT_DELAY)
}
