//! Run a forwarder ring and print what the fabric did.
//!
//! Each process injects `per-node` messages addressed to its successors
//! around the ring, the round runs to quiescence, and the harness
//! telemetry is logged at the end.

use clap::Parser;
use tracing::info;

use simnet_algos::forwarder::{FCall, Forwarder};
use simnet_harness::{Config, Harness};

#[derive(Debug, Parser)]
#[command(name = "ring", about = "Forwarder ring demo for the simnet harness")]
struct Args {
    /// Number of processes in the ring.
    #[arg(long, default_value_t = 10)]
    scale: usize,

    /// Messages injected per process.
    #[arg(long, default_value_t = 10)]
    per_node: usize,

    /// Emit per-event debug logs from the worker loops.
    #[arg(long)]
    debug: bool,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let harness = Harness::with_fleet(Config { debug: args.debug }, args.scale, |pid, api| {
        Box::new(Forwarder::new(pid, api))
    });

    let scale = args.scale;
    let per_node = args.per_node;
    harness.inject(move |pid, client| {
        for k in 0..per_node {
            client.call(Box::new(FCall {
                seq: (pid * per_node + k) as u64,
                to: (pid + k + 1) % scale,
                payload: Vec::new(),
            }));
        }
    });

    info!(scale, per_node, "running round");
    match harness.round() {
        Ok((responses, traces)) => {
            let delivered: usize = responses.iter().map(Vec::len).sum();
            let traced: usize = traces.iter().map(Vec::len).sum();
            info!(delivered, traced, "round complete");
            info!("{}", harness.status());
            print!("{}", harness.buffer_stats());
        }
        Err(err) => info!(%err, "round failed"),
    }
}
