//! Example: Tagged stream through a small flowgraph
//!
//! A repeating, tagged vector source feeds an adder and a decimator. Tags
//! are published as messages to a debug block while the items land in a
//! vector sink.
//!
//! Usage:
//!   cargo run --release --example flowgraph_demo -- -n 100000 --decimation 4
//!
//! One thread per block, custom runtime settings:
//!   cargo run --release --example flowgraph_demo -- \
//!       --per-block --config runtime.toml

use clap::Parser;
use sdrflow::blocks::{
    AddConst, Head, KeepOneInN, MessageDebug, TagForwarder, VectorSink, VectorSource,
};
use sdrflow::{FlowGraph, Pmt, PortRef, RuntimeConfig, SizingScope, Tag, ThreadingMode};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of items to push through the graph
    #[arg(short, long, default_value = "100000")]
    n: u64,

    /// Keep one in every N items
    #[arg(short, long, default_value = "4")]
    decimation: usize,

    /// Constant added to every item
    #[arg(long, default_value = "1000")]
    offset: i32,

    /// Length of the repeating source pattern (tagged once per repetition)
    #[arg(long, default_value = "4096")]
    pattern: usize,

    /// Run every block on its own thread
    #[arg(long)]
    per_block: bool,

    /// Size buffers only for their direct readers
    #[arg(long)]
    immediate_sizing: bool,

    /// Runtime configuration TOML file (optional)
    #[arg(long)]
    config: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("=== Flowgraph Demo ===");
    info!(
        "Items: {}, decimation: {}, offset: {}",
        args.n, args.decimation, args.offset
    );

    let mut config = match &args.config {
        Some(path) => {
            info!("Config: {}", path);
            RuntimeConfig::load(path)?
        }
        None => RuntimeConfig::default(),
    };
    if args.per_block {
        config = config.with_threading(ThreadingMode::PerBlock);
    }
    if args.immediate_sizing {
        config = config.with_sizing_scope(SizingScope::Immediate);
    }

    let pattern: Vec<i32> = (0..args.pattern.max(1) as i32).collect();
    let source = VectorSource::new(pattern)
        .with_repeat(true)
        .with_tags(vec![Tag::new(0, "pattern_start", Pmt::Null)]);

    let sink = VectorSink::<i32>::new();
    let data = sink.handle();
    let debug = MessageDebug::new().with_name("tag_log");
    let messages = debug.handle();

    let mut fg = FlowGraph::new().with_config(config);
    let src = fg.add_block(source)?;
    let head = fg.add_block(Head::<i32>::new(args.n))?;
    let add = fg.add_block(AddConst::new(args.offset))?;
    let decim = fg.add_block(KeepOneInN::<i32>::new(args.decimation)?)?;
    let tags = fg.add_block(TagForwarder::<i32>::new())?;
    let sink = fg.add_block(sink)?;
    let debug = fg.add_block(debug)?;

    fg.connect(PortRef::new(src, 0), PortRef::new(head, 0))?;
    fg.connect(PortRef::new(head, 0), PortRef::new(add, 0))?;
    fg.connect(PortRef::new(add, 0), PortRef::new(decim, 0))?;
    fg.connect(PortRef::new(decim, 0), PortRef::new(tags, 0))?;
    fg.connect(PortRef::new(tags, 0), PortRef::new(sink, 0))?;
    fg.msg_connect(tags, "tags", debug, "in")?;

    // Build and run
    info!("Building flowgraph...");
    let scheduler = fg.build()?;
    info!("Running on {} threads", scheduler.num_threads());

    let report = scheduler.wait();

    for stats in &report.stats {
        info!(
            "{:>16}: {} work calls, {} consumed, {} produced, {} messages",
            stats.name,
            stats.work_calls,
            stats.items_consumed,
            stats.items_produced,
            stats.messages_handled
        );
    }
    for failure in &report.failures {
        warn!("{}", failure);
    }

    info!(
        "Collected {} items and {} tag messages",
        data.len(),
        messages.len()
    );
    if let Some(first) = data.data().first() {
        info!("First item: {}", first);
    }

    if !report.is_success() {
        return Err(format!("{} block(s) failed", report.failures.len()).into());
    }

    info!("Done!");

    Ok(())
}
