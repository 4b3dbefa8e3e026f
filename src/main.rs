//! FrameLink - Fixed-frame TCP client and serial sensor tools
//!
//! Sends single 11-byte request frames to a server, receives them locally,
//! and simulates/monitors a temperature and pressure sensor on a serial line.

mod config;
mod network;
mod protocol;
mod sensor;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::Config;
use network::{Reply, Server, ServerEvent, Transport};
use protocol::{Frame, MessageKind};
use sensor::{Monitor, MonitorEvent, ReadingFields, ReadingGenerator, Simulator};

/// FrameLink - fixed-frame client and sensor simulator
#[derive(Parser)]
#[command(name = "framelink")]
#[command(author = "FrameLink Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Send fixed-format request frames and simulate serial sensors", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one request frame and print the reply
    Send {
        /// Server host
        #[arg(long)]
        host: Option<String>,

        /// Server port
        #[arg(short, long)]
        port: Option<u16>,

        /// Message kind to send
        #[arg(short, long, value_enum, default_value_t = MessageKind::CreateMeeting)]
        kind: MessageKind,

        /// Raw message type id (overrides --kind)
        #[arg(long, conflicts_with = "kind")]
        type_id: Option<u64>,

        /// Address field, as dotted IPv4 or a plain number
        #[arg(short, long, default_value = "0", value_parser = parse_address)]
        address: u64,

        /// Reserved payload length field (low byte must be zero)
        #[arg(long, default_value_t = 0)]
        payload_length: u64,

        /// Give up waiting for a reply after this many milliseconds
        #[arg(long)]
        read_timeout_ms: Option<u64>,
    },

    /// Receive frames and acknowledge them
    Serve {
        /// Interface to bind to
        #[arg(short, long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Write simulated sensor readings to a serial device
    Simulate {
        /// Serial device path (e.g. /dev/pts/1 or COM3)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Interval between readings in milliseconds
        #[arg(short, long)]
        interval_ms: Option<u64>,

        /// Stop after this many readings
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Seed for reproducible readings
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Read and display sensor readings from a serial device
    Monitor {
        /// Serial device path (e.g. /dev/pts/2 or COM4)
        #[arg(short, long)]
        device: Option<PathBuf>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Output path for generated config
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

/// Accept `a.b.c.d` or a decimal number
fn parse_address(value: &str) -> Result<u64, String> {
    if let Ok(ip) = value.parse::<Ipv4Addr>() {
        return Ok(u32::from(ip) as u64);
    }
    value
        .parse::<u64>()
        .map_err(|_| format!("'{}' is neither an IPv4 address nor a number", value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Initialize logging
    let level = if cli.verbose || config.general.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Send {
            host,
            port,
            kind,
            type_id,
            address,
            payload_length,
            read_timeout_ms,
        } => {
            let message_type = type_id.unwrap_or(kind.id() as u64);
            let frame = Frame::from_raw(message_type, address, payload_length)?;

            let mut net_config = config.client.network();
            if let Some(host) = host {
                net_config.host = host;
            }
            if let Some(port) = port {
                net_config.port = port;
            }
            if let Some(timeout) = read_timeout_ms {
                net_config = net_config.with_read_timeout(timeout);
            }

            run_send(frame, net_config).await?;
        }
        Commands::Serve { bind, port } => {
            let bind = bind.unwrap_or(config.server.bind_address.clone());
            let port = port.unwrap_or(config.server.port);
            run_server(&bind, port).await?;
        }
        Commands::Simulate {
            device,
            baud,
            interval_ms,
            count,
            seed,
        } => {
            let mut sim_config = config.simulator.clone();
            if let Some(device) = device {
                sim_config.device = device;
            }
            if let Some(baud) = baud {
                sim_config.baud_rate = baud;
            }
            if let Some(interval_ms) = interval_ms {
                sim_config.interval_ms = interval_ms;
            }
            run_simulator(sim_config, count, seed).await?;
        }
        Commands::Monitor { device, baud } => {
            let mut mon_config = config.monitor.clone();
            if let Some(device) = device {
                mon_config.device = device;
            }
            if let Some(baud) = baud {
                mon_config.baud_rate = baud;
            }
            run_monitor(mon_config).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                if let Some(path) = output {
                    config::sample_config().save(&path)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", config::generate_sample_config()?);
                }
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_info();
        }
    }

    Ok(())
}

/// Send a single frame and report the reply
async fn run_send(frame: Frame, net_config: network::NetworkConfig) -> anyhow::Result<()> {
    if let Err(e) = frame.kind() {
        tracing::warn!("{}; sending anyway", e);
    }

    let addr = network::resolve_host(&net_config.host, net_config.port)
        .await
        .map_err(network::TransportError::Connection)?;

    let mut transport = Transport::connect(addr, net_config).await?;
    println!("Connected to server!");

    transport.send_frame(&frame).await?;
    match frame.kind() {
        Ok(kind) => println!("Sent {} message to server.", kind),
        Err(_) => println!("Sent message type {} to server.", frame.message_type()),
    }

    let reply = transport.await_reply().await?;
    tracing::debug!("Transport finished in state {}", transport.state());
    transport.close().await;

    match reply {
        Reply::Data(_) => println!("Server response: {}", reply.text().unwrap_or_default()),
        Reply::GracefulClose => println!("Server closed connection."),
    }

    Ok(())
}

/// Run the local frame receiver
async fn run_server(bind: &str, port: u16) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = network::resolve_host(bind, port).await?;

    let mut server = Server::new(bind_addr);
    let mut event_rx = server
        .take_event_receiver()
        .ok_or_else(|| anyhow::anyhow!("server event receiver already taken"))?;

    let bound = server.start().await?;

    println!("\n========================================");
    println!("  FrameLink Server Running");
    println!("========================================");
    println!("  Listening: {}", bound);
    println!("========================================");
    println!("\nPress Ctrl+C to stop.\n");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                match event {
                    ServerEvent::FrameReceived { addr, frame } => {
                        let kind = frame.kind().map(|k| k.to_string()).unwrap_or_default();
                        println!("+ {} from {} (address {})", kind, addr, frame.ipv4());
                    }
                    ServerEvent::FrameRejected { addr, error } => {
                        println!("- Rejected frame from {}: {}", addr, error);
                    }
                    ServerEvent::ClientDisconnected { addr } => {
                        tracing::debug!("{} left without sending a frame", addr);
                    }
                    ServerEvent::Error { message } => {
                        tracing::error!("Server error: {}", message);
                    }
                    ServerEvent::Started { bind_addr } => {
                        tracing::debug!("Accepting on {}", bind_addr);
                    }
                    ServerEvent::Stopped => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    if server.is_running() {
        server.stop().await?;
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// Write readings to the serial device until Ctrl+C or the count is reached
async fn run_simulator(
    sim_config: config::SimulatorConfig,
    count: Option<u64>,
    seed: Option<u64>,
) -> anyhow::Result<()> {
    let generator = match seed {
        Some(seed) => ReadingGenerator::seeded(
            seed,
            sim_config.temperature_range(),
            sim_config.pressure_range(),
        )?,
        None => ReadingGenerator::new(sim_config.temperature_range(), sim_config.pressure_range())?,
    };

    let mut simulator = Simulator::new(generator, Duration::from_millis(sim_config.interval_ms))?;
    if let Some(count) = count {
        simulator = simulator.with_max_readings(count);
    }

    let sink = sensor::open_writer(&sim_config.serial())?;

    println!("Simulating sensor on {}... (Press Ctrl+C to stop)", sim_config.device.display());
    let handle = simulator.spawn(sink);

    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop.send(()).await;
        }
    });

    let stats = handle.join().await?;
    println!("Sent {} readings ({} failed).", stats.sent, stats.failed);

    Ok(())
}

/// Print readings from the serial device until end of stream or Ctrl+C
async fn run_monitor(mon_config: config::MonitorConfig) -> anyhow::Result<()> {
    let source = sensor::open_reader(&mon_config.serial())?;
    let mut monitor = Monitor::new(BufReader::new(source));

    println!("Status: Connected - reading {}", mon_config.device.display());

    loop {
        tokio::select! {
            event = monitor.next_event() => {
                let Some(event) = event? else {
                    println!("Device closed.");
                    break;
                };
                tracing::debug!("Received: {}", event.raw());
                match event {
                    MonitorEvent::Reading { raw, .. } => {
                        if let Ok(fields) = ReadingFields::split(&raw) {
                            println!("{}", fields.temperature_label());
                            println!("{}", fields.pressure_label());
                        }
                    }
                    MonitorEvent::Malformed { raw, error } => {
                        tracing::warn!("Ignoring '{}': {}", raw, error);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                break;
            }
        }
    }

    println!("Status: Disconnected ({} lines received)", monitor.lines_seen());
    Ok(())
}

/// Print protocol information
fn print_info() {
    let example = Frame::new(MessageKind::CreateMeeting).to_bytes();
    let hex: Vec<String> = example.iter().map(|b| format!("{:02x}", b)).collect();

    println!("FrameLink Protocol Information");
    println!("==============================\n");

    println!("Frame size: {} bytes", protocol::FRAME_SIZE);
    println!(
        "Markers: start '{}' / end '{}'",
        protocol::START_MARKER as char,
        protocol::END_MARKER as char
    );
    println!("Default server: {}:{}", protocol::DEFAULT_HOST, protocol::DEFAULT_PORT);
    println!("\nMessage kinds:");
    for kind in MessageKind::ALL {
        println!("  {:>5}  {}", kind.id(), kind);
    }
    println!("\nExample {} frame: {}", MessageKind::CreateMeeting, hex.join(" "));

    println!("\nSerial link: 8N1, no flow control, default {} baud", sensor::DEFAULT_BAUD_RATE);
    println!(
        "Supported baud rates: {}",
        sensor::SUPPORTED_BAUD_RATES
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    #[cfg(target_os = "linux")]
    {
        println!("\nLinux: create a linked pty pair for testing with:");
        println!("  socat -d -d pty,raw,echo=0 pty,raw,echo=0");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["framelink", "info"]);
        assert!(cli.is_ok());
    }

    #[test]
    fn test_send_defaults_to_create_meeting() {
        let cli = Cli::try_parse_from(["framelink", "send"]).unwrap();
        match cli.command {
            Commands::Send {
                kind,
                type_id,
                address,
                payload_length,
                ..
            } => {
                assert_eq!(kind, MessageKind::CreateMeeting);
                assert_eq!(type_id, None);
                assert_eq!(address, 0);
                assert_eq!(payload_length, 0);
            }
            _ => panic!("expected send"),
        }
    }

    #[test]
    fn test_kind_and_type_id_conflict() {
        let cli = Cli::try_parse_from(["framelink", "send", "--kind", "create-meeting", "--type-id", "2"]);
        assert!(cli.is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("10.0.0.1"), Ok(0x0A00_0001));
        assert_eq!(parse_address("42"), Ok(42));
        assert!(parse_address("localhost").is_err());
    }
}
