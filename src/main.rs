//! Binary entrypoint for the roadmesh CLI.
//!
//! Commands:
//! - `listen [--port <path> | --host <addr>] [--channel <n>] [--daemon]` - answer mesh commands
//! - `query [kind] [location] [--send]` - one fetch cycle to stdout or on air
//! - `test-command "<text>"` - run a command through the handlers, replies on stdout
//! - `simulate "<text>" [--from <id>] [--channel <n>]` - push a fake inbound packet through the full path
//! - `init` - write a starter `roadmesh.toml`
//!
//! See the library crate docs for module-level details: `roadmesh::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;

use roadmesh::config::{Config, ConnectionKind};
use roadmesh::geocode::nominatim::NominatimGeocoder;
use roadmesh::geocode::{CoordinateGeocoder, ReverseGeocoder};
use roadmesh::relay::commands::CommandKind;
use roadmesh::relay::format::EventFormatter;
use roadmesh::relay::listener::{self, ControlMessage, ListenerState};
use roadmesh::relay::query::{run_query, QueryOutput};
use roadmesh::relay::sender::OutboundSender;
use roadmesh::relay::transport::{parse_node_id, ConsoleTransport, InboundPacket, RadioTransport};
use roadmesh::traffic::az511::Az511Client;
use roadmesh::traffic::TrafficSource;

#[derive(Parser)]
#[command(name = "roadmesh")]
#[command(about = "Relay Arizona 511 traffic information over a Meshtastic mesh")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "roadmesh.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for commands on the mesh and answer them
    Listen {
        /// Meshtastic serial port (e.g., /dev/ttyUSB0)
        #[arg(short, long, conflicts_with = "host")]
        port: Option<String>,

        /// Meshtastic TCP host (e.g., 192.168.1.50 or meshtastic.local)
        #[arg(long)]
        host: Option<String>,

        /// Channel index to listen and reply on
        #[arg(long)]
        channel: Option<u32>,

        /// Run as a background daemon (Unix only)
        #[arg(short, long)]
        daemon: bool,

        /// PID file location (for daemon mode)
        #[arg(long, default_value = "/tmp/roadmesh.pid")]
        pid_file: String,
    },
    /// Fetch once and print (or send) the results
    Query {
        /// accidents, events, alerts or weather
        #[arg(default_value = "accidents")]
        kind: String,

        /// Location filter; `all` for no filter
        #[arg(default_value = "phoenix")]
        location: String,

        /// Put the results on air instead of printing them
        #[arg(long)]
        send: bool,
    },
    /// Run a command string through the handlers and print the replies
    TestCommand {
        /// e.g. "accidents I10"
        text: String,
    },
    /// Feed a synthetic inbound text packet through the listener path
    Simulate {
        /// Message text
        text: String,

        /// Sender node id (!hex, 0xhex or decimal)
        #[arg(long, default_value = "!7e570001")]
        from: String,

        /// Channel the packet arrived on (defaults to the configured channel)
        #[arg(long)]
        channel: Option<u32>,

        /// Pretend the local radio has this node id (to exercise self-echo handling)
        #[arg(long)]
        local_id: Option<String>,
    },
    /// Write a starter configuration file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    // .env is optional; real environment variables win
    let _ = dotenvy::dotenv();

    if let Commands::Init = cli.command {
        init_logging(None, cli.verbose);
        Config::create_default(&cli.config).await?;
        println!("Wrote default configuration to {}", cli.config);
        println!("Set ADOT_API_KEY (or [traffic] api_key) before running `roadmesh listen`.");
        return Ok(());
    }

    let mut config = Config::load_or_default(&cli.config).await?;
    config.apply_env()?;

    if let Commands::Listen {
        port,
        host,
        channel,
        ..
    } = &cli.command
    {
        if let Some(port) = port {
            config.meshtastic.connection = ConnectionKind::Serial;
            config.meshtastic.port = port.clone();
        }
        if let Some(host) = host {
            config.meshtastic.connection = ConnectionKind::Tcp;
            config.meshtastic.tcp_host = Some(host.clone());
        }
        if let Some(channel) = channel {
            config.meshtastic.channel = *channel;
        }
    }

    // Daemon mode: fork before logging so the child owns the log file
    match &cli.command {
        #[cfg(all(unix, feature = "daemon"))]
        Commands::Listen {
            daemon: true,
            pid_file,
            ..
        } => {
            config.validate()?;
            daemonize_process(&config, pid_file)?;
        }
        #[cfg(not(all(unix, feature = "daemon")))]
        Commands::Listen { daemon: true, .. } => {
            eprintln!("Daemon mode requires a Unix build with the `daemon` feature");
            std::process::exit(1);
        }
        _ => {}
    }

    init_logging(Some(&config), cli.verbose);

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    let traffic: Arc<dyn TrafficSource> = Arc::new(Az511Client::new(
        &config.traffic,
        EventFormatter::new(&config.region)?,
    ));
    let geocoder: Arc<dyn ReverseGeocoder> = if config.geocoding.enabled {
        Arc::new(NominatimGeocoder::new(&config.geocoding))
    } else {
        Arc::new(CoordinateGeocoder)
    };

    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Listen { .. } => listen(&config, traffic, geocoder).await,
        Commands::Query {
            kind,
            location,
            send,
        } => {
            let kind: CommandKind = kind.parse().map_err(|e: String| anyhow!(e))?;
            let send = send || config.meshtastic.send_enabled;
            query(&config, traffic.as_ref(), geocoder.as_ref(), kind, &location, send).await
        }
        Commands::TestCommand { text } => {
            let mut state = console_state(&config, None, traffic, geocoder)?;
            let outcome = state.process_text(&text).await;
            println!("Outcome: {:?}", outcome);
            Ok(())
        }
        Commands::Simulate {
            text,
            from,
            channel,
            local_id,
        } => {
            let from = parse_node_id(&from).ok_or_else(|| anyhow!("Invalid node id '{}'", from))?;
            let local = match local_id {
                Some(raw) => {
                    Some(parse_node_id(&raw).ok_or_else(|| anyhow!("Invalid node id '{}'", raw))?)
                }
                None => None,
            };
            let channel = channel.unwrap_or(config.meshtastic.channel);
            let mut state = console_state(&config, local, traffic, geocoder)?;
            let outcome = state
                .handle_packet(InboundPacket::text(from, channel, text))
                .await;
            println!("Outcome: {:?}", outcome);
            Ok(())
        }
    }
}

async fn listen(
    config: &Config,
    traffic: Arc<dyn TrafficSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
) -> Result<()> {
    info!("Starting roadmesh v{}", env!("CARGO_PKG_VERSION"));
    #[cfg(feature = "meshtastic-proto")]
    {
        let connector = roadmesh::meshtastic::MeshtasticConnector::new(&config.meshtastic);
        let handle = listener::spawn(config, &connector, traffic, geocoder).await?;

        let control = handle.control();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl+C, shutting down listener");
                let _ = control.send(ControlMessage::Shutdown);
            }
        });

        let reason = handle.join().await?;
        info!("Listener stopped ({:?})", reason);
        Ok(())
    }
    #[cfg(not(feature = "meshtastic-proto"))]
    {
        let _ = (config, traffic, geocoder);
        Err(anyhow!(
            "listen requires the `meshtastic-proto` feature (radio support not compiled in)"
        ))
    }
}

async fn query(
    config: &Config,
    traffic: &dyn TrafficSource,
    geocoder: &dyn ReverseGeocoder,
    kind: CommandKind,
    location: &str,
    send: bool,
) -> Result<()> {
    if !send {
        let report = run_query(config, traffic, geocoder, kind, location, QueryOutput::Console).await?;
        info!(
            "Query done: {} fetched, {} emitted, {} duplicates",
            report.fetched, report.emitted, report.duplicates
        );
        return Ok(());
    }

    #[cfg(feature = "meshtastic-proto")]
    {
        let connection = roadmesh::meshtastic::MeshtasticTransport::open(&config.meshtastic).await?;
        let sender = OutboundSender::new(connection.transport.clone(), &config.meshtastic);
        let result = run_query(config, traffic, geocoder, kind, location, QueryOutput::Radio(&sender)).await;
        connection.transport.close().await;
        let report = result?;
        info!(
            "Sent {} messages ({} duplicates skipped); {}",
            report.emitted,
            report.duplicates,
            roadmesh::metrics::snapshot()
        );
        Ok(())
    }
    #[cfg(not(feature = "meshtastic-proto"))]
    {
        log::warn!("Radio support not compiled in; printing instead");
        run_query(config, traffic, geocoder, kind, location, QueryOutput::Console).await?;
        Ok(())
    }
}

/// Listener state wired to stdout instead of a radio; no pacing between lines.
fn console_state(
    config: &Config,
    local_node_id: Option<u32>,
    traffic: Arc<dyn TrafficSource>,
    geocoder: Arc<dyn ReverseGeocoder>,
) -> Result<ListenerState> {
    let transport: Arc<dyn RadioTransport> = Arc::new(ConsoleTransport::new(local_node_id));
    let sender = OutboundSender::with_settings(
        transport,
        config.meshtastic.max_message_size,
        config.meshtastic.channel,
        Duration::ZERO,
    );
    Ok(ListenerState::new(config, traffic, geocoder, sender)?)
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match verbosity {
        0 => config
            .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
            .unwrap_or(log::LevelFilter::Info),
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // In daemon mode stdout is the log file, so don't echo
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}

/// Re-spawn this binary detached, write the PID file and exit the parent.
#[cfg(all(unix, feature = "daemon"))]
fn daemonize_process(config: &Config, pid_file: &str) -> Result<()> {
    use std::fs::OpenOptions;
    use std::process::Command;

    let log_path = config.logging.file.as_deref().unwrap_or("roadmesh.log");

    let current_exe = std::env::current_exe()?;
    let mut args: Vec<String> = std::env::args().collect();
    // Drop the daemon flag so the child runs in the foreground
    args.retain(|arg| arg != "--daemon" && arg != "-d");
    let child_args = args.get(1..).unwrap_or_default();

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)?;

    let child = Command::new(&current_exe)
        .args(child_args)
        .stdin(std::process::Stdio::null())
        .stdout(log_file.try_clone()?)
        .stderr(log_file)
        .spawn()?;

    std::fs::write(pid_file, format!("{}", child.id()))?;
    println!("roadmesh running in background (pid {})", child.id());
    std::process::exit(0);
}
