mod chat;
mod events;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mesh_session::{DeviceId, SessionConfig, SessionRuntime};
use mesh_transport::{TcpAdapter, TransportConfig};

#[derive(Parser)]
#[command(name = "mesh-chat", about = "Group chat over a local mesh session")]
struct Cli {
    /// Device name, also used as this device's id.
    #[arg(short, long, default_value = "host")]
    name: String,

    /// Max frame size in bytes.
    #[arg(long, default_value = "1048576")]
    max_frame_size: usize,

    /// Print session events as JSON lines instead of plain text.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Own the group: listen and accept attendees.
    Host {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:7070")]
        listen: SocketAddr,
    },

    /// Join a host's group.
    Join {
        /// Host address.
        #[arg(long)]
        host: SocketAddr,
        /// Host device id.
        #[arg(long, default_value = "host")]
        host_id: String,
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:0")]
        listen: SocketAddr,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = TransportConfig::new()
        .max_frame_size(cli.max_frame_size)
        .device_name(cli.name.clone());
    let session_config = SessionConfig::new().max_payload_size(cli.max_frame_size);

    let (listen, role, config) = match cli.command {
        Command::Host { listen } => (listen, chat::Role::Host, config),
        Command::Join {
            host,
            host_id,
            listen,
        } => {
            let host_id: DeviceId = host_id.parse()?;
            (
                listen,
                chat::Role::Attendee(host_id.clone()),
                config.static_peer(host_id, host),
            )
        }
    };

    let (adapter, transport_events) = TcpAdapter::bind(listen, config).await?;

    eprintln!("mesh-chat v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("Device: {} on {}", cli.name, adapter.local_addr());
    eprintln!();

    let session = SessionRuntime::spawn(Arc::new(adapter), transport_events, session_config);
    chat::run(session, role, events::Output::new(cli.json)).await
}
