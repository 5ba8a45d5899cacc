use anyhow::Result;
use clap::Parser;
use url::Url;

use acbusemu::{
    config::{port_url, Port, ReplicaConfig},
    logging,
    protocol::replies::PollReply,
    replica::UnitReplica,
};

/// Emulator for the indoor unit
///
/// Answers the panel's control frames with canned replies and logs every
/// change in the settings the panel sends.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to connect to
    ///
    /// a serial device path, or serial:///device/path or tcp+raw://host:port URLs
    #[arg(value_parser = port_url)]
    port: Url,

    /// Reply sent to the panel's power-up poll
    #[arg(long, value_enum, default_value_t = PollReply::Primary)]
    poll_reply: PollReply,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();

    let port = Port::open(&args.port).await?.transport();

    let config = ReplicaConfig {
        poll_reply: args.poll_reply,
        ..Default::default()
    };

    UnitReplica::new(port, config).run().await?;

    Ok(())
}
