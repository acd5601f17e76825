mod events;
mod swarm;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use clap::Parser;
use coord_protocol::{CoordConfig, SchedulerIntervals};

use crate::events::{emit, now_iso, EventNodeSummary, EventStarted, EventSummary};

#[derive(Parser)]
#[command(name = "coord-sim", about = "Run a swarm of in-memory coordination nodes")]
struct Cli {
    /// Number of regular peers.
    #[arg(long, default_value = "4")]
    nodes: usize,

    /// Number of relay-capable nodes (bootstrap relays for the peers).
    #[arg(long, default_value = "1")]
    relays: usize,

    /// Total run time.
    #[arg(long, default_value = "10")]
    duration_secs: u64,

    /// Period of every maintenance task and of message retries, in ms.
    #[arg(long, default_value = "500")]
    tick_ms: u64,

    /// Private messages sent by each peer.
    #[arg(long, default_value = "5")]
    messages: u32,

    /// JSON file with a node configuration (camelCase keys, all optional).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit JSONL events on stdout instead of a text report.
    #[arg(long)]
    json: bool,

    /// Log at info level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

fn load_config(cli: &Cli) -> anyhow::Result<CoordConfig> {
    let config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<CoordConfig>(&raw)
                .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?
                .with_env()
        }
        None => CoordConfig::new(),
    };
    // Every timer runs on the same tick.
    let tick = Duration::from_millis(cli.tick_ms.max(1));
    let retry_limit = config.retry_limit;
    Ok(config
        .intervals(SchedulerIntervals::uniform(tick))
        .retry(tick, retry_limit)
        .probe_timeout(tick * 2))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_filter = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let start = Instant::now();
    let base = load_config(&cli)?;

    if cli.json {
        emit(&EventStarted {
            event: "started",
            nodes: cli.nodes,
            relays: cli.relays,
            duration_s: cli.duration_secs,
            tick_ms: cli.tick_ms,
            topic: base.topic.clone(),
            timestamp: now_iso(),
        });
    } else {
        eprintln!("coord-sim v{}", env!("CARGO_PKG_VERSION"));
        eprintln!(
            "{} peers, {} relays, {}s, tick {}ms, topic {}",
            cli.nodes, cli.relays, cli.duration_secs, cli.tick_ms, base.topic
        );
        eprintln!();
    }

    let report = swarm::run(
        swarm::SwarmConfig {
            nodes: cli.nodes,
            relays: cli.relays,
            duration: Duration::from_secs(cli.duration_secs),
            messages: cli.messages,
            base,
            json: cli.json,
        },
        start,
    )
    .await?;

    let received: usize = report.nodes.iter().map(|n| n.messages_received).sum();
    let ack_pct = if report.messages_sent > 0 {
        report.messages_acked as f64 * 100.0 / report.messages_sent as f64
    } else {
        0.0
    };

    if cli.json {
        for node in &report.nodes {
            emit(&EventNodeSummary {
                event: "node_summary",
                node: &node.id,
                relay: node.relay,
                peers: node.peers,
                relays: node.relays,
                messages_received: node.messages_received,
                stats: &node.stats,
            });
        }
        emit(&EventSummary {
            event: "summary",
            nodes: report.nodes.len(),
            messages_sent: report.messages_sent,
            messages_acked: report.messages_acked,
            send_failures: report.send_failures,
            messages_received: received,
            ack_pct,
            elapsed_s: start.elapsed().as_secs_f64(),
        });
        return Ok(());
    }

    println!(
        "{:<10} {:>5} {:>6} {:>5} {:>5} {:>7} {:>5} {:>5}",
        "node", "relay", "peers", "rlys", "recv", "retries", "acks", "dups"
    );
    for node in &report.nodes {
        println!(
            "{:<10} {:>5} {:>6} {:>5} {:>5} {:>7} {:>5} {:>5}",
            node.id,
            if node.relay { "yes" } else { "-" },
            node.peers,
            node.relays,
            node.messages_received,
            node.stats.retries.get(),
            node.stats.acks_received.get(),
            node.stats.duplicates_dropped.get(),
        );
    }
    println!();
    println!(
        "sent {}  acked {} ({ack_pct:.1}%)  failed {}  received {}  in {:.1}s",
        report.messages_sent,
        report.messages_acked,
        report.send_failures,
        received,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}
