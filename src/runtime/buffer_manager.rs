//! Buffer sizing and allocation for one partition
//!
//! Buffers are created in two passes: one writer per distinct connected
//! output port, then one reader per connected input port. All writers of a
//! partition exist before any reader attaches.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

use tracing::{debug, info, warn};

use super::buffer::{BufferProperties, OutputBuffer};
use super::errors::TopologyError;
use super::graph::{BlockId, FlowGraph};
use super::ports::PortRef;
use super::reader::{DefaultReaderFactory, InputBuffer, ReaderFactory};
use super::tracker::AllocationTracker;
use crate::config::{RuntimeConfig, SizingScope};

/// Readers and writers of one partition, in port order per block
#[derive(Default)]
pub struct PartitionBuffers {
    pub readers: HashMap<BlockId, Vec<Box<dyn InputBuffer>>>,
    pub writers: HashMap<BlockId, Vec<Box<dyn OutputBuffer>>>,
}

pub struct BufferManager<'a> {
    config: &'a RuntimeConfig,
    tracker: &'a AllocationTracker,
}

impl<'a> BufferManager<'a> {
    pub fn new(config: &'a RuntimeConfig, tracker: &'a AllocationTracker) -> Self {
        Self { config, tracker }
    }

    /// Look-behind a reader of `block` must be able to grow to
    fn reserve_of(graph: &FlowGraph, block: BlockId) -> usize {
        let entry = graph.block_entry(block);
        entry.block.history().max(entry.block.max_history()).max(1)
    }

    /// Blocks whose needs count towards the size of `src`'s buffer
    fn sizing_targets(&self, graph: &FlowGraph, src: PortRef) -> BTreeSet<BlockId> {
        let direct: BTreeSet<BlockId> = graph
            .edges()
            .iter()
            .filter(|e| e.src == src)
            .map(|e| e.dst.block)
            .collect();
        if self.config.sizing_scope == SizingScope::Immediate {
            return direct;
        }

        let mut seen = direct.clone();
        let mut queue: VecDeque<BlockId> = direct.into_iter().collect();
        while let Some(block) = queue.pop_front() {
            for edge in graph.edges().iter().filter(|e| e.src.block == block) {
                if seen.insert(edge.dst.block) {
                    queue.push_back(edge.dst.block);
                }
            }
        }
        seen
    }

    /// Items `block` needs buffered on input `port` (the worst input when
    /// `None`) to produce one output multiple, look-behind reserve included
    fn input_need(graph: &FlowGraph, block: BlockId, port: Option<usize>) -> usize {
        let consumer = &graph.block_entry(block).block;
        let rate = consumer.rate();
        let multiple = rate.effective_output_multiple(consumer.output_multiple());
        let reserve = Self::reserve_of(graph, block);
        if rate.ratio().is_some() {
            return rate.input_for_output(multiple).max(1) + reserve - 1;
        }

        // General rates: ask the block, its forecast already counts history - 1
        let connected = graph.edges().iter().filter(|e| e.dst.block == block).count();
        let nports = connected.max(port.map_or(1, |p| p + 1));
        let mut required = vec![0; nports];
        consumer.forecast(multiple, &mut required);
        let forecast = match port {
            Some(p) => required[p],
            None => required.iter().copied().max().unwrap_or(0),
        };
        let lookbehind = consumer.history().max(1) - 1;
        forecast.saturating_sub(lookbehind).max(1) + reserve - 1
    }

    /// Smallest size with which every direct reader can make progress
    fn hard_floor(&self, graph: &FlowGraph, src: PortRef) -> usize {
        let producer = &graph.block_entry(src.block).block;
        let mut floor = producer
            .rate()
            .effective_output_multiple(producer.output_multiple());
        for edge in graph.edges().iter().filter(|e| e.src == src) {
            floor = floor.max(Self::input_need(graph, edge.dst.block, Some(edge.dst.port)));
        }
        floor.max(1)
    }

    /// Number of items for the buffer behind output port `src`
    pub fn get_buffer_num_items(&self, graph: &FlowGraph, src: PortRef) -> usize {
        let entry = graph.block_entry(src.block);
        let item_size = entry
            .outputs
            .item_type(src.port)
            .map_or(1, |t| t.size())
            .max(1);

        let mut n = (2 * self.config.default_buffer_bytes / item_size).max(1);

        let producer = &entry.block;
        let producer_multiple = producer
            .rate()
            .effective_output_multiple(producer.output_multiple());
        n = n.max(2 * producer_multiple);

        for block in self.sizing_targets(graph, src) {
            n = n.max(2 * Self::input_need(graph, block, None));
        }

        let floor = self.hard_floor(graph, src);
        if let Some(policy) = entry.policies.get(&src.port) {
            if let Some(min) = policy.min_items {
                n = n.max(min);
            }
            if let Some(max) = policy.max_items
                && max < n
            {
                if max >= floor {
                    n = max;
                } else {
                    warn!(
                        "[{}] max_items {} on output {} is below the workable minimum {}, using {}",
                        entry.name, max, src.port, floor, floor
                    );
                    n = floor;
                }
            }
        }
        n.max(floor)
    }

    /// Allocate writers and attach readers for every edge inside `partition`
    pub fn initialize_buffers(
        &self,
        graph: &FlowGraph,
        partition: &[BlockId],
    ) -> crate::Result<PartitionBuffers> {
        let members: BTreeSet<BlockId> = partition.iter().copied().collect();
        let mut buffers = PartitionBuffers::default();

        // Pass 1: one writer per distinct connected source port
        let sources: BTreeSet<PortRef> = graph
            .edges()
            .iter()
            .filter(|e| members.contains(&e.src.block))
            .map(|e| e.src)
            .collect();
        let mut outputs: BTreeMap<PortRef, Box<dyn OutputBuffer>> = BTreeMap::new();
        for src in sources {
            let entry = graph.block_entry(src.block);
            let Some(item_type) = entry.outputs.item_type(src.port) else {
                continue;
            };
            let num_items = self.get_buffer_num_items(graph, src);
            let props = BufferProperties {
                num_items,
                item_type,
                name: format!("{}:{}", entry.name, src.port),
                max_bytes: self.config.max_buffer_bytes,
                tracker: self.tracker.clone(),
            };
            let factory = entry
                .policies
                .get(&src.port)
                .and_then(|p| p.factory.clone())
                .unwrap_or_else(|| graph.default_factory().clone());
            let buffer = factory.create(&props)?;
            info!(
                "[{}] Output {} buffer: {} items x {} bytes ({} factory)",
                entry.name,
                src.port,
                buffer.num_items(),
                item_type.size(),
                factory.name()
            );
            outputs.insert(src, buffer);
        }

        // Pass 2: one reader per connected input port
        let default_reader = DefaultReaderFactory;
        for &block in partition {
            let entry = graph.block_entry(block);
            let connected = graph.edges().iter().filter(|e| e.dst.block == block).count();
            let nports = connected.max(entry.inputs.min_streams());
            let history = entry.block.history().max(1);
            let reserve = Self::reserve_of(graph, block);

            let mut readers = Vec::with_capacity(nports);
            for port in 0..nports {
                let dst = PortRef::new(block, port);
                let edge = graph.edges().iter().find(|e| e.dst == dst);
                let writer = edge.and_then(|e| outputs.get(&e.src));
                let (Some(edge), Some(writer)) = (edge, writer) else {
                    return Err(TopologyError::MissingInput {
                        block: entry.name.clone(),
                        port,
                    }
                    .into());
                };
                let factory: &dyn ReaderFactory = match &edge.reader_factory {
                    Some(factory) => factory.as_ref(),
                    None => &default_reader,
                };
                let reader = factory.attach(writer.as_ref(), history, reserve, self.tracker)?;
                debug!(
                    "[{}] Input {} reads '{}' with history {} (reserve {})",
                    entry.name,
                    port,
                    writer.name(),
                    history,
                    reserve
                );
                readers.push(reader);
            }
            if !readers.is_empty() {
                buffers.readers.insert(block, readers);
            }
        }

        for (src, buffer) in outputs {
            buffers.writers.entry(src.block).or_default().push(buffer);
        }
        Ok(buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{KeepMInN, KeepOneInN, NullSink, NullSource, VectorSource};
    use crate::runtime::block::Block;
    use crate::runtime::buffer::BufferFactory;
    use crate::runtime::errors::BufferError;
    use crate::runtime::ports::{BufferPolicy, IoSignature};
    use crate::runtime::rate::Rate;
    use crate::runtime::tracker::Resource;
    use std::sync::Arc;

    /// Decimator with a configurable output multiple, for sizing tests
    struct Decim {
        decimation: usize,
        multiple: usize,
    }

    impl Block for Decim {
        fn name(&self) -> &str {
            "decim"
        }

        fn input_signature(&self) -> IoSignature {
            IoSignature::single::<f32>()
        }

        fn output_signature(&self) -> IoSignature {
            IoSignature::single::<f32>()
        }

        fn rate(&self) -> Rate {
            Rate::decimating(self.decimation)
        }

        fn output_multiple(&self) -> usize {
            self.multiple
        }
    }

    fn chain(config: RuntimeConfig, downstream: Vec<Decim>) -> (FlowGraph, PortRef) {
        let mut fg = FlowGraph::new().with_config(config);
        let src = fg.add_block(NullSource::<f32>::new()).unwrap();
        let mut prev = src;
        for (i, block) in downstream.into_iter().enumerate() {
            let id = fg.add_named_block(format!("decim{}", i), block).unwrap();
            fg.connect(PortRef::new(prev, 0), PortRef::new(id, 0)).unwrap();
            prev = id;
        }
        let sink = fg.add_block(NullSink::<f32>::new()).unwrap();
        fg.connect(PortRef::new(prev, 0), PortRef::new(sink, 0)).unwrap();
        (fg, PortRef::new(src, 0))
    }

    #[test]
    fn test_sizing_covers_decimation_times_multiple() {
        let config = RuntimeConfig::default().with_default_buffer_bytes(16);
        let (fg, src) = chain(config.clone(), vec![Decim { decimation: 8, multiple: 16 }]);
        let tracker = AllocationTracker::new();
        let manager = BufferManager::new(&config, &tracker);
        assert!(manager.get_buffer_num_items(&fg, src) >= 256);
    }

    #[test]
    fn test_sizing_scope() {
        let small = Decim { decimation: 1, multiple: 1 };
        let deep = Decim { decimation: 8, multiple: 16 };
        let reachable = RuntimeConfig::default().with_default_buffer_bytes(16);
        let immediate = reachable.clone().with_sizing_scope(SizingScope::Immediate);
        let tracker = AllocationTracker::new();

        let (fg, src) = chain(reachable.clone(), vec![small, deep]);
        assert!(BufferManager::new(&reachable, &tracker).get_buffer_num_items(&fg, src) >= 256);
        assert!(BufferManager::new(&immediate, &tracker).get_buffer_num_items(&fg, src) < 256);
    }

    #[test]
    fn test_policy_hints() {
        let config = RuntimeConfig::default();
        let tracker = AllocationTracker::new();
        let (mut fg, src) = chain(config.clone(), vec![Decim { decimation: 4, multiple: 2 }]);

        fg.set_buffer_policy(src, BufferPolicy::default().with_max_items(100)).unwrap();
        let manager = BufferManager::new(&config, &tracker);
        assert_eq!(manager.get_buffer_num_items(&fg, src), 100);

        // Below the workable minimum of one output multiple's input
        fg.set_buffer_policy(src, BufferPolicy::default().with_max_items(3)).unwrap();
        assert_eq!(manager.get_buffer_num_items(&fg, src), 8);

        fg.set_buffer_policy(src, BufferPolicy::default().with_min_items(1 << 20)).unwrap();
        assert_eq!(manager.get_buffer_num_items(&fg, src), 1 << 20);
    }

    #[test]
    fn test_general_rate_floor_follows_forecast() {
        let config = RuntimeConfig::default();
        let tracker = AllocationTracker::new();
        let mut fg = FlowGraph::new().with_config(config.clone());
        let src = fg.add_block(NullSource::<f32>::new()).unwrap();
        let keep = fg.add_block(KeepMInN::<f32>::new(3, 7).unwrap()).unwrap();
        let sink = fg.add_block(NullSink::<f32>::new()).unwrap();
        fg.connect(PortRef::new(src, 0), PortRef::new(keep, 0)).unwrap();
        fg.connect(PortRef::new(keep, 0), PortRef::new(sink, 0)).unwrap();

        // Three outputs need a whole group of seven inputs
        let src = PortRef::new(src, 0);
        fg.set_buffer_policy(src, BufferPolicy::default().with_max_items(1)).unwrap();
        let manager = BufferManager::new(&config, &tracker);
        assert_eq!(manager.get_buffer_num_items(&fg, src), 7);

        fg.set_buffer_policy(src, BufferPolicy::default()).unwrap();
        let tiny = RuntimeConfig::default().with_default_buffer_bytes(4);
        let manager = BufferManager::new(&tiny, &tracker);
        assert!(manager.get_buffer_num_items(&fg, src) >= 14);
    }

    #[test]
    fn test_initialize_partition_buffers() {
        let config = RuntimeConfig::default().with_default_buffer_bytes(64);
        let tracker = AllocationTracker::new();
        let mut fg = FlowGraph::new().with_config(config.clone());
        let src = fg.add_block(VectorSource::new(vec![0f32; 4])).unwrap();
        let keep = fg.add_block(KeepMInN::<f32>::new(3, 7).unwrap()).unwrap();
        let decim = fg.add_block(KeepOneInN::<f32>::new(2).unwrap()).unwrap();
        let sink = fg.add_block(NullSink::<f32>::new()).unwrap();
        fg.connect(PortRef::new(src, 0), PortRef::new(keep, 0)).unwrap();
        fg.connect(PortRef::new(keep, 0), PortRef::new(decim, 0)).unwrap();
        fg.connect(PortRef::new(decim, 0), PortRef::new(sink, 0)).unwrap();

        let partitions = fg.partition().unwrap();
        let manager = BufferManager::new(&config, &tracker);
        let buffers = manager.initialize_buffers(&fg, &partitions[0]).unwrap();

        assert_eq!(buffers.writers.len(), 3);
        assert_eq!(buffers.readers.len(), 3);
        assert_eq!(tracker.live(Resource::Buffer), 3);
        assert_eq!(tracker.live(Resource::Reader), 3);
        for readers in buffers.readers.values() {
            assert_eq!(readers.len(), 1);
            assert_eq!(readers[0].history(), 1);
        }
        drop(buffers);
        assert_eq!(tracker.live(Resource::Buffer), 0);
    }

    #[test]
    fn test_missing_required_input() {
        let config = RuntimeConfig::default();
        let tracker = AllocationTracker::new();
        let mut fg = FlowGraph::new();
        let sink = fg.add_block(NullSink::<f32>::new()).unwrap();

        let manager = BufferManager::new(&config, &tracker);
        assert!(matches!(
            manager.initialize_buffers(&fg, &[sink]),
            Err(crate::Error::Topology(TopologyError::MissingInput { port: 0, .. }))
        ));
    }

    struct Failing;

    impl BufferFactory for Failing {
        fn create(
            &self,
            props: &BufferProperties,
        ) -> Result<Box<dyn OutputBuffer>, BufferError> {
            Err(BufferError::ResourceExhausted {
                num_items: props.num_items,
                item_size: props.item_size(),
                limit: 0,
            })
        }
    }

    #[test]
    fn test_factory_selection_and_exhaustion() {
        let config = RuntimeConfig::default();
        let tracker = AllocationTracker::new();
        let (mut fg, src) = chain(config.clone(), vec![]);
        let partitions = fg.partition().unwrap();
        let manager = BufferManager::new(&config, &tracker);
        assert!(manager.initialize_buffers(&fg, &partitions[0]).is_ok());

        fg.set_buffer_policy(src, BufferPolicy::default().with_factory(Arc::new(Failing)))
            .unwrap();
        assert!(matches!(
            manager.initialize_buffers(&fg, &partitions[0]),
            Err(crate::Error::Buffer(BufferError::ResourceExhausted { .. }))
        ));

        let tiny = RuntimeConfig::default().with_max_buffer_bytes(64);
        let (fg, _) = chain(tiny.clone(), vec![]);
        let manager = BufferManager::new(&tiny, &tracker);
        assert!(matches!(
            manager.initialize_buffers(&fg, &fg.partition().unwrap()[0]),
            Err(crate::Error::Buffer(BufferError::ResourceExhausted { .. }))
        ));
        assert_eq!(tracker.live(Resource::Buffer), 0);
    }
}
