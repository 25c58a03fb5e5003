use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use bytes::Bytes;
use clap::Parser;
use clap_derive::Parser;
use peersync::peer::dispatcher::Dispatcher;
use peersync::peer::handle::PeerHandle;
use peersync::peer::listener::ResourceListener;
use peersync::peer::peer_config::PeerConfig;
use peersync::resource::delta::{Delta, Mutation, Record};
use peersync::resource::link::LinkState;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::sync::mpsc;
use tracing::{info, warn, Level};

/// Shares a list of text lines between peers.
///
/// Started with `--publish`, the peer publishes the list and edits it from stdin: a plain line is
///  appended, `-N` removes line N, `clear` empties the list. Started with `--subscribe ADDR`, the
///  peer mirrors the list published at ADDR and prints every change.
#[derive(Parser)]
struct Args {
    listen_address: String,

    #[clap(long, default_value = "shared-list")]
    name: String,

    #[clap(long, default_value_t = false)]
    publish: bool,

    #[clap(long)]
    subscribe: Option<String>,

    #[clap(long, default_value_t = 64)]
    delta_log_capacity: usize,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
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

    let mut config = PeerConfig::new(args.listen_address.parse()?);
    config.delta_log_capacity = args.delta_log_capacity;

    let dispatcher = Dispatcher::bind(Arc::new(config)).await?;
    let peer = dispatcher.handle();

    match (args.publish, args.subscribe) {
        (true, None) => {
            select! {
                _ = dispatcher.run() => Ok(()),
                result = run_publisher(peer.clone(), args.name) => {
                    peer.shutdown()?;
                    result
                }
            }
        }
        (false, Some(publisher_addr)) => {
            let publisher_addr: SocketAddr = publisher_addr.parse()?;
            select! {
                _ = dispatcher.run() => Ok(()),
                result = run_subscriber(peer, publisher_addr, args.name) => result,
            }
        }
        _ => Err(anyhow!("exactly one of --publish and --subscribe is required")),
    }
}

async fn run_publisher(peer: PeerHandle, name: String) -> anyhow::Result<()> {
    let list = peer.publish_resource(name, vec![]).await?;
    info!("publishing {:?} on {} - enter lines to edit it", list.name(), peer.local_addr());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let mutation = if line == "clear" {
            Mutation::Clear
        }
        else if let Some(index) = line.strip_prefix('-').and_then(|s| s.parse::<u32>().ok()) {
            Mutation::Remove { index }
        }
        else {
            Mutation::Append(Bytes::from(line))
        };

        match list.mutate_and_wait(mutation).await {
            Ok(seq) => info!("now at seq {}", seq),
            Err(e) => warn!("{}", e),
        }
    }
    Ok(())
}

/// prints all changes, and reports link state changes for the reconnection policy
struct PrintingListener {
    link_states: mpsc::UnboundedSender<LinkState>,
}

fn print_records(records: &[Record]) {
    for (i, r) in records.iter().enumerate() {
        println!("  {:3}: {}", i, String::from_utf8_lossy(r));
    }
}

impl ResourceListener for PrintingListener {
    fn on_snapshot(&self, name: &str, seq: u64, records: &[Record]) {
        println!("{} @{}: snapshot", name, seq);
        print_records(records);
    }

    fn on_delta(&self, name: &str, seq: u64, delta: &Delta) {
        println!("{} @{}: {:?}", name, seq, delta.changes);
    }

    fn on_link_state(&self, name: &str, state: LinkState) {
        println!("{}: {:?}", name, state);
        let _ = self.link_states.send(state);
    }
}

async fn run_subscriber(peer: PeerHandle, publisher_addr: SocketAddr, name: String) -> anyhow::Result<()> {
    let (link_states, mut link_states_rx) = mpsc::unbounded_channel();
    let listener = Arc::new(PrintingListener { link_states });
    let replica = peer.subscribe_resource(publisher_addr, name, listener).await?;

    while let Some(state) = link_states_rx.recv().await {
        if state == LinkState::Closed {
            tokio::time::sleep(Duration::from_secs(1)).await;
            info!("reconnecting to {}", publisher_addr);
            replica.reconnect()?;
        }
    }
    Ok(())
}
