//! Streaming buffers and flowgraph execution for software defined radio
//!
//! Blocks exchange typed item streams through circular buffers with one
//! writer and any number of readers, and discrete messages through
//! per-block inboxes. A [`FlowGraph`] is validated, split into connected
//! partitions and run by the [`Scheduler`], one worker thread per partition.
//!
//! # Architecture
//!
//! - **Buffer / BufferReader**: mirrored ring buffer; every window is contiguous
//! - **FlowGraph**: typed stream edges (acyclic) and message edges (may cycle)
//! - **BufferManager**: sizes buffers from rates and output multiples
//! - **Scheduler**: per-block dispatch state machine on worker threads
//! - **Blocks**: reference sources, sinks and processors
//!
//! # Example
//!
//! ```no_run
//! use sdrflow::blocks::{AddConst, CounterSource, VectorSink};
//! use sdrflow::{FlowGraph, PortRef};
//!
//! let mut fg = FlowGraph::new();
//! let src = fg.add_block(CounterSource::new(1000))?;
//! let add = fg.add_block(AddConst::new(1i32))?;
//! let sink = VectorSink::<i32>::new();
//! let data = sink.handle();
//! let sink = fg.add_block(sink)?;
//! fg.connect(PortRef::new(src, 0), PortRef::new(add, 0))?;
//! fg.connect(PortRef::new(add, 0), PortRef::new(sink, 0))?;
//!
//! let report = fg.run()?;
//! assert!(report.is_success());
//! assert_eq!(data.len(), 1000);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod blocks;
pub mod config;
pub mod runtime;

pub use config::{RuntimeConfig, SizingScope, ThreadingMode, WatchdogConfig};

// Re-export runtime components
pub use runtime::{
    AllocationTracker, Block, BlockFailure, BlockId, Buffer, BufferError, BufferFactory,
    BufferPolicy, BufferReader, ConfigError, FlowGraph, GraphError, IoSignature, Item, ItemType,
    Pmt, PortRef, Rate, RunReport, Scheduler, Symbol, Tag, TagPropagation, TopologyError,
    WorkError, WorkIo, WorkResult, WorkStatus,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Work(#[from] WorkError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Block '{block}' failed to start: {source}")]
    BlockStart { block: String, source: WorkError },

    #[error("Failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
