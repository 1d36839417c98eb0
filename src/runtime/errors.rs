//! Error types for the runtime system

use super::ports::PortDirection;

/// Error type for buffer allocation and cursor operations
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Item size must be non-zero")]
    ZeroItemSize,

    #[error("Buffer must hold at least one item")]
    ZeroCapacity,

    #[error(
        "Buffer of {num_items} items x {item_size} bytes exceeds the allocation limit of {limit} bytes"
    )]
    ResourceExhausted {
        num_items: usize,
        item_size: usize,
        limit: usize,
    },

    #[error("Failed to allocate {bytes} bytes for buffer '{name}'")]
    Allocation { name: String, bytes: usize },

    #[error("History {history} does not fit a buffer of {num_items} items")]
    HistoryTooLarge { history: usize, num_items: usize },

    #[error("History {history} exceeds the reserved look-behind of {reserve} items")]
    HistoryAboveReserve { history: usize, reserve: usize },

    #[error("Reader item type {reader} does not match buffer item type {buffer}")]
    ItemTypeMismatch {
        buffer: &'static str,
        reader: &'static str,
    },
}

/// Error type for connection operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(
        "Type mismatch: {from_block}:{from_port} ({from_type}, {from_size} bytes) -> {to_block}:{to_port} ({to_type}, {to_size} bytes)"
    )]
    TypeMismatch {
        from_block: String,
        from_port: usize,
        from_type: &'static str,
        from_size: usize,
        to_block: String,
        to_port: usize,
        to_type: &'static str,
        to_size: usize,
    },

    #[error("Input port {port} on block '{block}' is already connected")]
    PortAlreadyConnected { block: String, port: usize },

    #[error("{direction:?} port {port} is outside the signature of block '{block}'")]
    InvalidPort {
        block: String,
        port: usize,
        direction: PortDirection,
    },

    #[error("Block '{0}' not found")]
    BlockNotFound(String),

    #[error("Block with name '{0}' already exists")]
    DuplicateBlockName(String),

    #[error("{direction:?} message port '{port}' not found on block '{block}'")]
    MessagePortNotFound {
        block: String,
        port: String,
        direction: PortDirection,
    },

    #[error("Message edge {0} already exists")]
    DuplicateMessageEdge(String),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("Flowgraph is no longer running")]
    NotRunning,
}

/// Error type for graph validation, detected before any thread starts
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error(
        "Block '{block}' has {connected} connected {direction:?} ports, signature allows {min}..={max}"
    )]
    SignatureRange {
        block: String,
        direction: PortDirection,
        connected: usize,
        min: usize,
        max: String,
    },

    #[error("{direction:?} port {port} on block '{block}' is not connected but higher ports are")]
    NonContiguous {
        block: String,
        direction: PortDirection,
        port: usize,
    },

    #[error("Required input port {port} on block '{block}' has no edge")]
    MissingInput { block: String, port: usize },

    #[error("Block '{block}' rejected topology with {ninputs} inputs and {noutputs} outputs")]
    Rejected {
        block: String,
        ninputs: usize,
        noutputs: usize,
    },

    #[error("Stream edges form a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("Block '{block}' has invalid rate parameters: {reason}")]
    InvalidRate { block: String, reason: String },
}

/// Error type for configuration and block construction
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Invalid parameter for {block}: {reason}")]
    InvalidParameter { block: &'static str, reason: String },
}

/// Error type for work function operations
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    #[error("Block-specific error: {0}")]
    BlockError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Port {port} does not carry items of type {expected}")]
    PortType { port: usize, expected: &'static str },

    #[error("Port index {0} out of range")]
    PortIndex(usize),

    #[error("Work contract violated: {0}")]
    ContractViolation(String),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid value for parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("Shutdown signal received")]
    Shutdown,
}

/// Result type for work functions
pub type WorkResult<T = ()> = Result<T, WorkError>;
