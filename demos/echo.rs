use clap::Parser;
use clap_derive::{Parser, Subcommand};
use rudp_link::client::NetworkClient;
use rudp_link::server::NetworkServer;
use rudp_link::updater::Updater;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tracing::{info, Level};

#[derive(Parser)]
struct Args {
    #[clap(subcommand)]
    mode: Mode,

    /// interval of the tick that drives retries, in millis
    #[clap(long, default_value_t = 5)]
    tick_millis: u64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

#[derive(Subcommand)]
enum Mode {
    /// echoes every message back to its sender reliably
    Server {
        #[clap(long, default_value_t = 9876)]
        port: u16,
    },
    /// sends every line from stdin to the server and prints the echoes
    Client {
        #[clap(long, default_value = "127.0.0.1")]
        host: String,

        #[clap(long, default_value_t = 9876)]
        port: u16,

        #[clap(long, default_value_t = false)]
        unreliable: bool,
    },
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let updater = Arc::new(Updater::new());
    let ticker = updater.spawn_periodic(Duration::from_millis(args.tick_millis));

    let result = match args.mode {
        Mode::Server { port } => run_server(&updater, port).await,
        Mode::Client { host, port, unreliable } => run_client(&updater, &host, port, unreliable).await,
    };

    ticker.abort();
    result
}

async fn run_server(updater: &Arc<Updater>, port: u16) -> anyhow::Result<()> {
    let server = NetworkServer::serve(updater.as_ref(), port).await?;
    info!("echo server listening on {:?}", server.local_addr());

    let mut interval = tokio::time::interval(Duration::from_millis(10));
    while server.is_live() {
        select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => break,
        }

        for message in server.flush() {
            if let Some(client) = message.peer() {
                info!("echoing {} bytes to {:?}", message.payload().len(), client);
                server.send_message_reliable(message.payload(), client).await?;
            }
        }
    }

    server.close(updater.as_ref());
    Ok(())
}

async fn run_client(updater: &Arc<Updater>, host: &str, port: u16, unreliable: bool) -> anyhow::Result<()> {
    let client = NetworkClient::connect(updater.as_ref(), host, port).await?;
    info!("connected to {:?}", client.server());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interval = tokio::time::interval(Duration::from_millis(10));
    loop {
        select! {
            line = lines.next_line() => match line? {
                Some(line) if unreliable => client.send_message_unreliable(line.as_bytes()).await?,
                Some(line) => client.send_message_reliable(line.as_bytes()).await?,
                None => break,
            },
            _ = interval.tick() => {
                for message in client.flush() {
                    println!("{}", String::from_utf8_lossy(message.payload()));
                }
            }
        }
    }

    // give outstanding reliable messages a chance to be acknowledged
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while client.pending_reliable_count().await > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    for message in client.flush() {
        println!("{}", String::from_utf8_lossy(message.payload()));
    }

    client.close(updater.as_ref());
    Ok(())
}
