use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::info;
use url::Url;

use acbusemu::{
    config::{port_url, PanelConfig, Port, MIN_PERIOD_SECS},
    logging,
    panel::{user_loop, PanelMaster, SharedSettings},
};

/// Emulator for the control panel
///
/// Sends the current settings on every period. Change them by typing
/// `attribute=value` lines, e.g. `mode=heat` or `set_temperature=22`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to connect to
    ///
    /// a serial device path, or serial:///device/path or tcp+raw://host:port URLs
    #[arg(value_parser = port_url)]
    port: Url,

    /// Seconds between control frames
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u64).range(MIN_PERIOD_SECS..))]
    period_sec: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();

    let port = Port::open(&args.port).await?.transport();

    let config = PanelConfig {
        period: Duration::from_secs(args.period_sec),
        ..Default::default()
    };

    let settings = SharedSettings::default();
    let bus = tokio::spawn(PanelMaster::new(port, config, settings.clone()).run());

    let console = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
    user_loop(settings, console).await;

    info!("no more input, bus keeps running");

    bus.await.context("bus task")??;

    Ok(())
}
