use clap::Parser;
use listener::network::Listener;
use log::info;
use shared::DEFAULT_TRACKER_ADDR;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Tracker address to subscribe to
    #[arg(short = 't', long, default_value = DEFAULT_TRACKER_ADDR)]
    tracker: String,

    /// Name to subscribe under
    #[arg(short = 'n', long, default_value = "listener")]
    name: String,

    /// Local address to receive events on
    #[arg(short = 'b', long, default_value = "0.0.0.0:0")]
    bind: String,

    /// Print events as JSON lines on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting listener...");
    info!("Subscribing to {} as {}", args.tracker, args.name);

    let mut listener = Listener::new(&args.tracker, &args.bind, &args.name, args.json).await?;
    info!("Receiving events on {}", listener.local_addr()?);

    listener.run().await?;

    info!("Listener stopped");
    Ok(())
}
