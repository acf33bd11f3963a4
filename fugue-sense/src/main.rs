use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fugue_osc::{ControlListener, Telemetry, Uplink};
use fugue_sense::{
    Config, DeviceSession, MockRadio, Radio, RadioConfig, SessionManager, SessionOp, Setup, Timing,
    http,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "fugue-sense")]
#[command(about = "Stream wearable sensor data to an OSC collector")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "fs_config.json")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    validate: bool,

    /// Connect every device and start streaming right away
    #[arg(long)]
    autostart: bool,

    /// Shut down after this many seconds
    #[arg(long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "fugue_sense=info,fugue_osc=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    info!(path = ?cli.config, "Loading configuration");
    let config = Config::load(&cli.config)?;
    let setup = config.validate()?;

    for device in &setup.devices {
        info!(
            address = %device.config.address(),
            model = %device.config.model(),
            sensors = ?device.config.kinds().collect::<Vec<_>>(),
            adjustments = device.adjustments.len(),
            "Device configured"
        );
    }

    if cli.validate {
        info!(
            devices = setup.devices.len(),
            destination = %setup.network.socket_addr(),
            "Configuration is valid"
        );
        return Ok(());
    }

    run(config, setup, &cli).await
}

async fn run(config: Config, setup: Setup, cli: &Cli) -> color_eyre::Result<()> {
    let cancel = CancellationToken::new();
    let timing = Timing::from(&config.timing);

    let radio: Arc<dyn Radio> = match config.radio {
        RadioConfig::Mock { noise } => {
            info!(noise, "Using mock radio");
            Arc::new(MockRadio::simulated(noise))
        }
    };

    let destination = setup.network.socket_addr();
    let uplink = Uplink::bind(destination).await?;
    let (telemetry, telemetry_rx) = Telemetry::channel(config.control.queue_depth);
    let uplink_handle = tokio::spawn(uplink.run(telemetry_rx));
    info!(%destination, "Telemetry uplink ready");

    let mut manager = SessionManager::new(cancel.clone());
    for device in setup.devices {
        let session = DeviceSession::new(device.config, Arc::clone(&radio), telemetry.clone(), timing);
        manager.spawn(session);
    }
    // sessions own the remaining senders; the uplink drains once they are gone
    drop(telemetry);

    let listener = ControlListener::bind(config.control.listen_addr).await?;
    info!(addr = %listener.local_addr()?, "Control listener bound");
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let listener_handle = tokio::spawn(listener.serve(inbound_tx, cancel.clone()));

    let http_handle = config.server.http_addr.map(|addr| {
        tokio::spawn(http::serve(addr, manager.status_board(), cancel.clone()))
    });

    if cli.autostart {
        for (address, result) in manager.execute_all(SessionOp::StartStream).await {
            if let Err(e) = result {
                error!(%address, error = %e, "Failed to start streaming");
            }
        }
    }

    if let Some(secs) = cli.duration {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!(secs, "Run duration elapsed");
            cancel.cancel();
        });
    }

    tokio::select! {
        _ = manager.run(inbound_rx) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    for report in manager.shutdown().await {
        info!(%report, "Sample report");
    }

    match listener_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Control listener failed"),
        Err(e) => error!(error = %e, "Control listener task failed"),
    }
    if let Some(handle) = http_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server error"),
            Err(e) => error!(error = %e, "HTTP server task failed"),
        }
    }
    match uplink_handle.await {
        Ok(sent) => info!(sent, "Telemetry uplink drained"),
        Err(e) => warn!(error = %e, "Telemetry uplink task failed"),
    }

    info!("fugue-sense shut down complete");
    Ok(())
}
