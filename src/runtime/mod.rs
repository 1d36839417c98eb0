//! Runtime support for streaming flowgraphs

pub mod block;
pub mod buffer;
pub mod buffer_manager;
pub mod errors;
pub mod executor;
pub mod graph;
pub mod notify;
pub mod pmt;
pub mod ports;
pub mod rate;
pub mod reader;
pub mod scheduler;
pub mod tag;
pub mod tracker;
pub mod watchdog;
pub mod work_io;

pub use block::{Block, TagPropagation, WorkStatus};
pub use buffer::{
    Buffer, BufferFactory, BufferProperties, DefaultBufferFactory, OutputBuffer, make_buffer,
};
pub use buffer_manager::BufferManager;
pub use errors::{BufferError, ConfigError, GraphError, TopologyError, WorkError, WorkResult};
pub use executor::BlockStats;
pub use graph::{BlockId, FlowGraph, MessageEdge, StreamEdge};
pub use notify::Notifier;
pub use pmt::{Pmt, Symbol};
pub use ports::{BufferPolicy, IoSignature, Item, ItemType, PortDirection, PortRef};
pub use rate::Rate;
pub use reader::{BufferReader, DefaultReaderFactory, InputBuffer, ReaderFactory};
pub use scheduler::{BlockFailure, RunReport, Scheduler};
pub use tag::Tag;
pub use tracker::{AllocationTracker, Resource};
pub use watchdog::Watchdog;
pub use work_io::{Inputs, MessageOutbox, Outputs, WorkIo};
