//! Flowgraph builder
//!
//! Blocks are added by value and referred to by [`BlockId`]. Stream edges
//! connect typed output ports to input ports and must form a DAG; message
//! edges connect named message ports and may form cycles. `build()` checks
//! the topology, allocates buffers per partition and hands everything to the
//! [`Scheduler`].

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::block::Block;
use super::buffer::{BufferFactory, DefaultBufferFactory};
use super::buffer_manager::BufferManager;
use super::errors::{GraphError, TopologyError};
use super::pmt::Symbol;
use super::ports::{BufferPolicy, IoSignature, ItemType, PortDirection, PortRef};
use super::reader::ReaderFactory;
use super::scheduler::{PreparedBlock, Scheduler};
use super::tracker::AllocationTracker;
use crate::config::RuntimeConfig;

/// Unique identifier for a block in a flowgraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(usize);

impl BlockId {
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    pub fn as_usize(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl PortRef {
    fn describe(&self, graph: &FlowGraph) -> String {
        format!("{}:{}", graph.name_of(self.block), self.port)
    }
}

/// Stream connection from an output port to an input port
#[derive(Clone)]
pub struct StreamEdge {
    pub src: PortRef,
    pub dst: PortRef,
    pub item_type: ItemType,
    pub(crate) reader_factory: Option<Arc<dyn ReaderFactory>>,
}

impl fmt::Debug for StreamEdge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StreamEdge")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("item_type", &self.item_type)
            .field("custom_reader", &self.reader_factory.is_some())
            .finish()
    }
}

/// Asynchronous connection between message ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEdge {
    pub src: BlockId,
    pub src_port: Symbol,
    pub dst: BlockId,
    pub dst_port: Symbol,
}

pub(crate) struct BlockEntry {
    pub(crate) name: String,
    pub(crate) block: Box<dyn Block>,
    pub(crate) inputs: IoSignature,
    pub(crate) outputs: IoSignature,
    pub(crate) message_inputs: Vec<Symbol>,
    pub(crate) message_outputs: Vec<Symbol>,
    pub(crate) policies: HashMap<usize, BufferPolicy>,
}

/// Builder and validator for a graph of blocks
pub struct FlowGraph {
    blocks: Vec<BlockEntry>,
    names: HashMap<String, BlockId>,
    edges: Vec<StreamEdge>,
    message_edges: Vec<MessageEdge>,
    config: RuntimeConfig,
    tracker: AllocationTracker,
    default_factory: Arc<dyn BufferFactory>,
}

impl FlowGraph {
    pub fn new() -> Self {
        Self {
            blocks: Vec::new(),
            names: HashMap::new(),
            edges: Vec::new(),
            message_edges: Vec::new(),
            config: RuntimeConfig::default(),
            tracker: AllocationTracker::new(),
            default_factory: Arc::new(DefaultBufferFactory),
        }
    }

    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Count blocks, buffers and readers of this graph in `tracker`
    pub fn with_tracker(mut self, tracker: AllocationTracker) -> Self {
        self.tracker = tracker;
        self
    }

    /// Factory for output ports without their own [`BufferPolicy`] factory
    pub fn with_buffer_factory(mut self, factory: Arc<dyn BufferFactory>) -> Self {
        self.default_factory = factory;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn tracker(&self) -> &AllocationTracker {
        &self.tracker
    }

    /// Add a block under its own name
    pub fn add_block(&mut self, block: impl Block + 'static) -> Result<BlockId, GraphError> {
        let name = block.name().to_string();
        self.add_named_block(name, block)
    }

    /// Add a block under an explicit instance name
    pub fn add_named_block(
        &mut self,
        name: impl Into<String>,
        block: impl Block + 'static,
    ) -> Result<BlockId, GraphError> {
        let name = name.into();
        if self.names.contains_key(&name) {
            return Err(GraphError::DuplicateBlockName(name));
        }

        let id = BlockId::new(self.blocks.len());
        debug!("Adding block '{}' as {}", name, id);
        self.blocks.push(BlockEntry {
            inputs: block.input_signature(),
            outputs: block.output_signature(),
            message_inputs: block.message_inputs(),
            message_outputs: block.message_outputs(),
            name: name.clone(),
            block: Box::new(block),
            policies: HashMap::new(),
        });
        self.names.insert(name, id);
        Ok(id)
    }

    pub fn block_id(&self, name: &str) -> Option<BlockId> {
        self.names.get(name).copied()
    }

    pub fn block_name(&self, id: BlockId) -> Option<&str> {
        self.blocks.get(id.0).map(|entry| entry.name.as_str())
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn edges(&self) -> &[StreamEdge] {
        &self.edges
    }

    pub fn message_edges(&self) -> &[MessageEdge] {
        &self.message_edges
    }

    fn entry(&self, id: BlockId) -> Result<&BlockEntry, GraphError> {
        self.blocks
            .get(id.0)
            .ok_or_else(|| GraphError::BlockNotFound(id.to_string()))
    }

    pub(crate) fn block_entry(&self, id: BlockId) -> &BlockEntry {
        &self.blocks[id.0]
    }

    pub(crate) fn name_of(&self, id: BlockId) -> &str {
        self.block_name(id).unwrap_or("?")
    }

    pub(crate) fn default_factory(&self) -> &Arc<dyn BufferFactory> {
        &self.default_factory
    }

    /// Connect an output port to an input port
    pub fn connect(&mut self, src: PortRef, dst: PortRef) -> Result<(), GraphError> {
        self.connect_edge(src, dst, None)
    }

    /// Connect with a custom reader factory for the destination side
    pub fn connect_with_reader(
        &mut self,
        src: PortRef,
        dst: PortRef,
        reader_factory: Arc<dyn ReaderFactory>,
    ) -> Result<(), GraphError> {
        self.connect_edge(src, dst, Some(reader_factory))
    }

    /// Connect by block name and port index
    pub fn connect_named(
        &mut self,
        src_block: &str,
        src_port: usize,
        dst_block: &str,
        dst_port: usize,
    ) -> Result<(), GraphError> {
        let src = self
            .block_id(src_block)
            .ok_or_else(|| GraphError::BlockNotFound(src_block.to_string()))?;
        let dst = self
            .block_id(dst_block)
            .ok_or_else(|| GraphError::BlockNotFound(dst_block.to_string()))?;
        self.connect(PortRef::new(src, src_port), PortRef::new(dst, dst_port))
    }

    fn connect_edge(
        &mut self,
        src: PortRef,
        dst: PortRef,
        reader_factory: Option<Arc<dyn ReaderFactory>>,
    ) -> Result<(), GraphError> {
        let src_entry = self.entry(src.block)?;
        let dst_entry = self.entry(dst.block)?;

        let src_type = src_entry
            .outputs
            .item_type(src.port)
            .ok_or_else(|| GraphError::InvalidPort {
                block: src_entry.name.clone(),
                port: src.port,
                direction: PortDirection::Output,
            })?;
        let dst_type = dst_entry
            .inputs
            .item_type(dst.port)
            .ok_or_else(|| GraphError::InvalidPort {
                block: dst_entry.name.clone(),
                port: dst.port,
                direction: PortDirection::Input,
            })?;

        src_entry.block.rate().validate(&src_entry.name)?;
        dst_entry.block.rate().validate(&dst_entry.name)?;

        // Size is the wire-level contract; identity keeps typed slices sound
        if src_type.size() != dst_type.size() || src_type != dst_type {
            return Err(GraphError::TypeMismatch {
                from_block: src_entry.name.clone(),
                from_port: src.port,
                from_type: src_type.name(),
                from_size: src_type.size(),
                to_block: dst_entry.name.clone(),
                to_port: dst.port,
                to_type: dst_type.name(),
                to_size: dst_type.size(),
            });
        }

        if self.edges.iter().any(|edge| edge.dst == dst) {
            return Err(GraphError::PortAlreadyConnected {
                block: dst_entry.name.clone(),
                port: dst.port,
            });
        }

        debug!(
            "Connecting {} -> {} ({})",
            src.describe(self),
            dst.describe(self),
            src_type.name()
        );
        self.edges.push(StreamEdge {
            src,
            dst,
            item_type: src_type,
            reader_factory,
        });
        Ok(())
    }

    /// Subscribe `dst_port` of `dst` to messages posted on `src_port` of `src`
    pub fn msg_connect(
        &mut self,
        src: BlockId,
        src_port: &str,
        dst: BlockId,
        dst_port: &str,
    ) -> Result<(), GraphError> {
        let src_entry = self.entry(src)?;
        let dst_entry = self.entry(dst)?;

        if !src_entry.message_outputs.iter().any(|p| p == src_port) {
            return Err(GraphError::MessagePortNotFound {
                block: src_entry.name.clone(),
                port: src_port.to_string(),
                direction: PortDirection::Output,
            });
        }
        if !dst_entry.message_inputs.iter().any(|p| p == dst_port) {
            return Err(GraphError::MessagePortNotFound {
                block: dst_entry.name.clone(),
                port: dst_port.to_string(),
                direction: PortDirection::Input,
            });
        }

        let edge = MessageEdge {
            src,
            src_port: Symbol::new(src_port),
            dst,
            dst_port: Symbol::new(dst_port),
        };
        if self.message_edges.contains(&edge) {
            return Err(GraphError::DuplicateMessageEdge(format!(
                "{}:{} -> {}:{}",
                src_entry.name, src_port, dst_entry.name, dst_port
            )));
        }
        debug!(
            "Message edge {}:{} -> {}:{}",
            src_entry.name, src_port, dst_entry.name, dst_port
        );
        self.message_edges.push(edge);
        Ok(())
    }

    /// Sizing hints and factory for one output port
    pub fn set_buffer_policy(&mut self, port: PortRef, policy: BufferPolicy) -> Result<(), GraphError> {
        let entry = self
            .blocks
            .get_mut(port.block.0)
            .ok_or_else(|| GraphError::BlockNotFound(port.block.to_string()))?;
        if entry.outputs.item_type(port.port).is_none() {
            return Err(GraphError::InvalidPort {
                block: entry.name.clone(),
                port: port.port,
                direction: PortDirection::Output,
            });
        }
        entry.policies.insert(port.port, policy);
        Ok(())
    }

    /// Check every block's connections against its signature and
    /// `check_topology`, and reject cycles over stream edges.
    pub fn validate(&self) -> Result<(), TopologyError> {
        for (index, entry) in self.blocks.iter().enumerate() {
            let id = BlockId::new(index);
            let inputs: BTreeSet<usize> = self
                .edges
                .iter()
                .filter(|e| e.dst.block == id)
                .map(|e| e.dst.port)
                .collect();
            let outputs: BTreeSet<usize> = self
                .edges
                .iter()
                .filter(|e| e.src.block == id)
                .map(|e| e.src.port)
                .collect();

            Self::check_ports(entry, PortDirection::Input, &entry.inputs, &inputs)?;
            Self::check_ports(entry, PortDirection::Output, &entry.outputs, &outputs)?;

            entry.block.rate().validate(&entry.name)?;

            if !entry.block.check_topology(inputs.len(), outputs.len()) {
                return Err(TopologyError::Rejected {
                    block: entry.name.clone(),
                    ninputs: inputs.len(),
                    noutputs: outputs.len(),
                });
            }
        }

        let all: Vec<BlockId> = (0..self.blocks.len()).map(BlockId::new).collect();
        self.topological_sort(&all)?;
        Ok(())
    }

    fn check_ports(
        entry: &BlockEntry,
        direction: PortDirection,
        signature: &IoSignature,
        connected: &BTreeSet<usize>,
    ) -> Result<(), TopologyError> {
        if let Some(missing) = (0..connected.len()).find(|port| !connected.contains(port)) {
            return Err(TopologyError::NonContiguous {
                block: entry.name.clone(),
                direction,
                port: missing,
            });
        }
        if !signature.allows_count(connected.len()) {
            return Err(TopologyError::SignatureRange {
                block: entry.name.clone(),
                direction,
                connected: connected.len(),
                min: signature.min_streams(),
                max: signature.max_label(),
            });
        }
        Ok(())
    }

    /// Order `blocks` so that every stream edge between them points forward.
    ///
    /// Ready blocks are taken in declaration order, so identical graphs
    /// always sort identically. Message edges are ignored.
    pub fn topological_sort(&self, blocks: &[BlockId]) -> Result<Vec<BlockId>, TopologyError> {
        let members: BTreeSet<BlockId> = blocks.iter().copied().collect();
        let mut indegree: BTreeMap<BlockId, usize> = members.iter().map(|&id| (id, 0)).collect();
        let mut successors: HashMap<BlockId, Vec<BlockId>> = HashMap::new();

        for edge in &self.edges {
            if members.contains(&edge.src.block) && members.contains(&edge.dst.block) {
                *indegree.entry(edge.dst.block).or_default() += 1;
                successors.entry(edge.src.block).or_default().push(edge.dst.block);
            }
        }

        let mut ready: BinaryHeap<Reverse<BlockId>> = indegree
            .iter()
            .filter(|&(_, &deg)| deg == 0)
            .map(|(&id, _)| Reverse(id))
            .collect();
        let mut order = Vec::with_capacity(members.len());

        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for next in successors.get(&id).into_iter().flatten() {
                if let Some(deg) = indegree.get_mut(next) {
                    *deg -= 1;
                    if *deg == 0 {
                        ready.push(Reverse(*next));
                    }
                }
            }
        }

        if order.len() < members.len() {
            let stuck = indegree
                .iter()
                .filter(|&(_, &deg)| deg > 0)
                .map(|(&id, _)| self.name_of(id).to_string())
                .collect();
            return Err(TopologyError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Connected components over stream edges, ordered by their first
    /// declared block, each topologically sorted.
    pub fn partition(&self) -> Result<Vec<Vec<BlockId>>, TopologyError> {
        let mut parent: Vec<usize> = (0..self.blocks.len()).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for edge in &self.edges {
            let a = find(&mut parent, edge.src.block.0);
            let b = find(&mut parent, edge.dst.block.0);
            if a != b {
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                parent[hi] = lo;
            }
        }

        // Roots are always the smallest index of their component
        let mut groups: BTreeMap<usize, Vec<BlockId>> = BTreeMap::new();
        for index in 0..self.blocks.len() {
            let root = find(&mut parent, index);
            groups.entry(root).or_default().push(BlockId::new(index));
        }

        groups
            .into_values()
            .map(|members| self.topological_sort(&members))
            .collect()
    }

    /// Validate, allocate buffers, start every block and launch the workers
    pub fn build(self) -> crate::Result<Scheduler> {
        self.validate()?;
        let partitions = self.partition()?;
        info!(
            "Building flowgraph: {} blocks, {} stream edges, {} message edges, {} partitions",
            self.blocks.len(),
            self.edges.len(),
            self.message_edges.len(),
            partitions.len()
        );

        let manager = BufferManager::new(&self.config, &self.tracker);
        let mut readers = HashMap::new();
        let mut writers = HashMap::new();
        for partition in &partitions {
            let buffers = manager.initialize_buffers(&self, partition)?;
            readers.extend(buffers.readers);
            writers.extend(buffers.writers);
        }

        let FlowGraph {
            blocks,
            message_edges,
            config,
            tracker,
            ..
        } = self;

        let mut prepared = Vec::with_capacity(blocks.len());
        for (index, entry) in blocks.into_iter().enumerate() {
            let id = BlockId::new(index);
            prepared.push(PreparedBlock {
                id,
                name: entry.name,
                block: entry.block,
                readers: readers.remove(&id).unwrap_or_default(),
                writers: writers.remove(&id).unwrap_or_default(),
            });
        }

        start_blocks(&mut prepared)?;
        Scheduler::launch(prepared, partitions, message_edges, config, tracker)
    }

    /// Build, run to completion and report
    pub fn run(self) -> crate::Result<super::scheduler::RunReport> {
        Ok(self.build()?.wait())
    }
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Call `start()` on every block; on failure stop the ones already started
fn start_blocks(prepared: &mut [PreparedBlock]) -> crate::Result<()> {
    for index in 0..prepared.len() {
        if let Err(source) = prepared[index].block.start() {
            let failed = prepared[index].name.clone();
            warn!("[{}] start() failed: {}", failed, source);
            for started in prepared[..index].iter_mut().rev() {
                if let Err(e) = started.block.stop() {
                    warn!("[{}] stop() failed: {}", started.name, e);
                }
            }
            return Err(crate::Error::BlockStart {
                block: failed,
                source,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{AddConst, CounterSource, KeepOneInN, MessageDebug, NullSink, TagForwarder, VectorSink, VectorSource};
    use crate::runtime::block::WorkStatus;
    use crate::runtime::errors::WorkResult;
    use crate::runtime::rate::Rate;
    use crate::runtime::work_io::WorkIo;
    use proptest::prelude::*;

    fn port(block: BlockId, port: usize) -> PortRef {
        PortRef::new(block, port)
    }

    struct Picky;

    impl Block for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn input_signature(&self) -> IoSignature {
            IoSignature::new::<f32>(1, None)
        }

        fn check_topology(&self, ninputs: usize, _noutputs: usize) -> bool {
            ninputs % 2 == 0
        }

        fn work(&mut self, _io: &mut WorkIo) -> WorkResult<WorkStatus> {
            Ok(WorkStatus::Ok)
        }
    }

    struct Relay;

    impl Block for Relay {
        fn name(&self) -> &str {
            "relay"
        }

        fn message_inputs(&self) -> Vec<Symbol> {
            vec![Symbol::new("in")]
        }

        fn message_outputs(&self) -> Vec<Symbol> {
            vec![Symbol::new("out")]
        }
    }

    #[test]
    fn test_basic_graph_building() {
        let mut fg = FlowGraph::new();
        let src = fg.add_block(VectorSource::new(vec![1.0f32, 2.0])).unwrap();
        let sink = fg.add_block(VectorSink::<f32>::new()).unwrap();

        assert!(fg.connect(port(src, 0), port(sink, 0)).is_ok());
        assert!(fg.validate().is_ok());
        assert_eq!(fg.edges().len(), 1);
        assert_eq!(fg.block_name(sink), Some("vector_sink"));
    }

    /// Decimator with a zero factor
    struct BadRate;

    impl Block for BadRate {
        fn name(&self) -> &str {
            "bad_rate"
        }

        fn input_signature(&self) -> IoSignature {
            IoSignature::single::<f32>()
        }

        fn rate(&self) -> Rate {
            Rate::decimating(0)
        }
    }

    #[test]
    fn test_connect_rejects_invalid_rate() {
        let mut fg = FlowGraph::new();
        let src = fg.add_block(VectorSource::new(vec![1.0f32])).unwrap();
        let bad = fg.add_block(BadRate).unwrap();
        match fg.connect(port(src, 0), port(bad, 0)) {
            Err(GraphError::Topology(TopologyError::InvalidRate { block, .. })) => {
                assert_eq!(block, "bad_rate")
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(fg.edges().is_empty());
    }

    #[test]
    fn test_duplicate_name() {
        let mut fg = FlowGraph::new();
        fg.add_block(NullSink::<f32>::new()).unwrap();
        assert!(matches!(
            fg.add_block(NullSink::<f32>::new()),
            Err(GraphError::DuplicateBlockName(_))
        ));
        assert!(fg.add_named_block("sink2", NullSink::<f32>::new()).is_ok());
    }

    #[test]
    fn test_type_mismatch() {
        let mut fg = FlowGraph::new();
        let src = fg.add_block(VectorSource::new(vec![1u32])).unwrap();
        let narrow = fg.add_block(NullSink::<u16>::new()).unwrap();
        let same_size = fg.add_named_block("f32_sink", NullSink::<f32>::new()).unwrap();

        assert!(matches!(
            fg.connect(port(src, 0), port(narrow, 0)),
            Err(GraphError::TypeMismatch { from_size: 4, to_size: 2, .. })
        ));
        assert!(matches!(
            fg.connect(port(src, 0), port(same_size, 0)),
            Err(GraphError::TypeMismatch { from_size: 4, to_size: 4, .. })
        ));
    }

    #[test]
    fn test_invalid_port_and_double_connect() {
        let mut fg = FlowGraph::new();
        let a = fg.add_named_block("a", VectorSource::new(vec![0i16])).unwrap();
        let b = fg.add_named_block("b", VectorSource::new(vec![0i16])).unwrap();
        let sink = fg.add_block(NullSink::<i16>::new()).unwrap();

        assert!(matches!(
            fg.connect(port(a, 1), port(sink, 0)),
            Err(GraphError::InvalidPort { direction: PortDirection::Output, .. })
        ));
        assert!(matches!(
            fg.connect(port(a, 0), port(sink, 1)),
            Err(GraphError::InvalidPort { direction: PortDirection::Input, .. })
        ));
        fg.connect(port(a, 0), port(sink, 0)).unwrap();
        assert!(matches!(
            fg.connect(port(b, 0), port(sink, 0)),
            Err(GraphError::PortAlreadyConnected { .. })
        ));
        assert!(matches!(
            fg.connect_named("nope", 0, "b", 0),
            Err(GraphError::BlockNotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_validate_signature_and_check_topology() {
        let mut fg = FlowGraph::new();
        fg.add_block(NullSink::<f32>::new()).unwrap();
        assert!(matches!(
            fg.validate(),
            Err(TopologyError::SignatureRange { connected: 0, min: 1, .. })
        ));

        let mut fg = FlowGraph::new();
        let picky = fg.add_block(Picky).unwrap();
        let a = fg.add_named_block("a", VectorSource::new(vec![0f32])).unwrap();
        fg.connect(port(a, 0), port(picky, 0)).unwrap();
        assert!(matches!(fg.validate(), Err(TopologyError::Rejected { ninputs: 1, .. })));

        let b = fg.add_named_block("b", VectorSource::new(vec![0f32])).unwrap();
        let c = fg.add_named_block("c", VectorSource::new(vec![0f32])).unwrap();
        fg.connect(port(b, 0), port(picky, 2)).unwrap();
        assert!(matches!(
            fg.validate(),
            Err(TopologyError::NonContiguous { port: 1, .. })
        ));
        fg.connect(port(c, 0), port(picky, 1)).unwrap();
        assert!(matches!(fg.validate(), Err(TopologyError::Rejected { ninputs: 3, .. })));
    }

    #[test]
    fn test_stream_cycle_rejected_message_cycle_allowed() {
        let mut fg = FlowGraph::new();
        let a = fg.add_named_block("a", AddConst::new(1i32)).unwrap();
        let b = fg.add_named_block("b", AddConst::new(2i32)).unwrap();
        fg.connect(port(a, 0), port(b, 0)).unwrap();
        fg.connect(port(b, 0), port(a, 0)).unwrap();
        match fg.validate() {
            Err(TopologyError::Cycle(names)) => assert_eq!(names, vec!["a", "b"]),
            other => panic!("expected cycle, got {:?}", other),
        }

        let mut fg = FlowGraph::new();
        let x = fg.add_named_block("x", TagForwarder::<f32>::new()).unwrap();
        let y = fg.add_named_block("y", Relay).unwrap();
        let z = fg.add_named_block("z", Relay).unwrap();
        fg.msg_connect(x, "tags", y, "in").unwrap();
        fg.msg_connect(y, "out", z, "in").unwrap();
        fg.msg_connect(z, "out", y, "in").unwrap();
        assert!(matches!(
            fg.msg_connect(z, "out", y, "in"),
            Err(GraphError::DuplicateMessageEdge(_))
        ));
        assert!(matches!(
            fg.msg_connect(x, "nope", y, "in"),
            Err(GraphError::MessagePortNotFound { direction: PortDirection::Output, .. })
        ));
        let src = fg.add_named_block("src", VectorSource::new(vec![0f32])).unwrap();
        let sink = fg.add_named_block("sink", NullSink::<f32>::new()).unwrap();
        fg.connect(port(src, 0), port(x, 0)).unwrap();
        fg.connect(port(x, 0), port(sink, 0)).unwrap();
        assert!(fg.validate().is_ok());
    }

    #[test]
    fn test_topological_sort_is_deterministic() {
        let mut fg = FlowGraph::new();
        let sink = fg.add_named_block("sink", NullSink::<i32>::new()).unwrap();
        let add = fg.add_named_block("add", AddConst::new(1i32)).unwrap();
        let src = fg.add_named_block("src", CounterSource::new(10)).unwrap();
        let lone = fg.add_named_block("lone", MessageDebug::new()).unwrap();
        fg.connect(port(src, 0), port(add, 0)).unwrap();
        fg.connect(port(add, 0), port(sink, 0)).unwrap();

        let order = fg.topological_sort(&[sink, add, src, lone]).unwrap();
        assert_eq!(order, vec![src, add, sink, lone]);
    }

    #[test]
    fn test_partition() {
        let mut fg = FlowGraph::new();
        let s1 = fg.add_named_block("s1", CounterSource::new(10)).unwrap();
        let s2 = fg.add_named_block("s2", CounterSource::new(10)).unwrap();
        let k1 = fg.add_named_block("k1", NullSink::<i32>::new()).unwrap();
        let d2 = fg.add_named_block("d2", KeepOneInN::<i32>::new(2).unwrap()).unwrap();
        let k2 = fg.add_named_block("k2", NullSink::<i32>::new()).unwrap();
        let m = fg.add_named_block("m", MessageDebug::new()).unwrap();
        fg.connect(port(s2, 0), port(d2, 0)).unwrap();
        fg.connect(port(d2, 0), port(k2, 0)).unwrap();
        fg.connect(port(s1, 0), port(k1, 0)).unwrap();

        let partitions = fg.partition().unwrap();
        assert_eq!(partitions, vec![vec![s1, k1], vec![s2, d2, k2], vec![m]]);
    }

    proptest! {
        #[test]
        fn prop_topological_order_respects_edges(
            n in 2usize..12,
            raw_edges in proptest::collection::vec((0usize..12, 0usize..12), 0..30),
        ) {
            let mut fg = FlowGraph::new();
            let ids: Vec<BlockId> = (0..n)
                .map(|i| fg.add_named_block(format!("b{}", i), AddConst::new(0i32)).unwrap())
                .collect();
            // Only forward edges, so the graph is acyclic; each input once
            for (a, b) in raw_edges {
                let (a, b) = (a % n, b % n);
                if a < b {
                    let _ = fg.connect(port(ids[a], 0), port(ids[b], 0));
                }
            }
            let order = fg.topological_sort(&ids).unwrap();
            prop_assert_eq!(order.len(), n);
            let position: HashMap<BlockId, usize> =
                order.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            for edge in fg.edges() {
                prop_assert!(position[&edge.src.block] < position[&edge.dst.block]);
            }
        }
    }
}
