use clap::Parser;
use log::{error, info};
use regex_lite::Regex;
use shared::{
    DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUERY_TIMEOUT_MS, DEFAULT_SETTLE_DELAY_MS,
    DEFAULT_SWEEP_INTERVAL_MS, DEFAULT_TRACKER_ADDR,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracker::config::{
    parse_plugin_entry, TrackerConfig, DEFAULT_SINK_CAPACITY, DEFAULT_START_PATTERN,
};
use tracker::console::{ConsoleEvent, ConsoleFeed};
use tracker::feed::ChunkOptions;
use tracker::network::NetworkServer;
use tracker::service::{ControlMessage, Tracker};
use tracker::store::Store;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// UDP address listeners subscribe on
    #[arg(short = 'b', long, default_value = DEFAULT_TRACKER_ADDR)]
    bind: String,

    /// Milliseconds between poll cycles
    #[arg(short = 'i', long, default_value_t = DEFAULT_POLL_INTERVAL_MS)]
    interval: u64,

    /// Milliseconds between cache sweeps
    #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL_MS)]
    sweep_interval: u64,

    /// Upper bound on each console query in milliseconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_MS)]
    query_timeout: u64,

    /// Quiet period after the last matching line in milliseconds
    #[arg(long, default_value_t = DEFAULT_SETTLE_DELAY_MS)]
    settle_delay: u64,

    /// Directory for persisted state
    #[arg(short = 's', long, default_value = "state")]
    state_dir: PathBuf,

    /// Events queued per subscriber before they are dropped
    #[arg(long, default_value_t = DEFAULT_SINK_CAPACITY)]
    sink_capacity: usize,

    /// Known subscriber as name=host:port, may be repeated
    #[arg(short = 'p', long = "plugin", value_parser = parse_plugin_entry)]
    plugins: Vec<(String, std::net::SocketAddr)>,

    /// Console line that marks a server (re)start
    #[arg(long, default_value = DEFAULT_START_PATTERN)]
    start_pattern: String,

    /// Game server command line
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    server: Vec<String>,
}

impl Args {
    fn config(&self) -> TrackerConfig {
        TrackerConfig {
            poll_interval: Duration::from_millis(self.interval),
            sweep_interval: Duration::from_millis(self.sweep_interval),
            query: ChunkOptions {
                timeout_delay: Duration::from_millis(self.query_timeout),
                after_match_delay: Duration::from_millis(self.settle_delay),
            },
            bind_addr: self.bind.clone(),
            state_dir: self.state_dir.clone(),
            sink_capacity: self.sink_capacity,
            plugins: self.plugins.clone(),
            start_pattern: self.start_pattern.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.config();
    config.validate()?;

    let mut network = NetworkServer::bind(&config.bind_addr, config.sink_capacity).await?;
    network.persist_peers(Arc::new(Store::open(&config.state_dir)?))?;
    let peers = network.peers();
    for (name, addr) in &config.plugins {
        peers.register(name, *addr);
    }

    let (program, server_args) = args
        .server
        .split_first()
        .ok_or("missing game server command")?;
    let (feed, mut console_events) =
        ConsoleFeed::spawn(program, server_args, Regex::new(&config.start_pattern)?)?;

    let store = Store::open(&config.state_dir)?;
    let tracker = Tracker::new(config, feed, Arc::new(peers), store)?;

    let (control_tx, control_rx) = mpsc::channel::<ControlMessage>(256);
    network.spawn_receiver(control_tx.clone());

    // Forward server lifecycle into the tracker loop
    {
        let control_tx = control_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = console_events.recv().await {
                let message = match event {
                    ConsoleEvent::Started => ControlMessage::ServerStarted,
                    ConsoleEvent::Exited(_) => ControlMessage::ServerExited,
                };
                if control_tx.send(message).await.is_err() {
                    break;
                }
            }
        });
    }

    // Stop on Ctrl+C
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down gracefully...");
            let _ = control_tx.send(ControlMessage::Shutdown).await;
        }
    });

    if let Err(e) = tracker.run(control_rx).await {
        error!("Tracker stopped with error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
