//! Port descriptions: item types, IO signatures and port references

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use super::buffer::{Buffer, BufferFactory, BufferProperties, OutputBuffer};
use super::errors::BufferError;
use super::graph::BlockId;

/// Anything that can travel through a stream buffer.
///
/// `Default` provides the zero value seen in look-behind before a stream starts.
pub trait Item: Copy + Default + Send + Sync + 'static {}

impl<T> Item for T where T: Copy + Default + Send + Sync + 'static {}

/// Runtime description of a stream item type.
///
/// Besides identity and size it carries the constructor for a typed
/// [`Buffer`], so erased code can allocate buffers without a global registry.
#[derive(Clone, Copy)]
pub struct ItemType {
    type_id: TypeId,
    name: &'static str,
    size: usize,
    instantiate: fn(&BufferProperties) -> Result<Box<dyn OutputBuffer>, BufferError>,
}

fn instantiate_buffer<T: Item>(
    props: &BufferProperties,
) -> Result<Box<dyn OutputBuffer>, BufferError> {
    Ok(Box::new(Buffer::<T>::from_properties(props)?))
}

impl ItemType {
    pub fn of<T: Item>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            size: size_of::<T>(),
            instantiate: instantiate_buffer::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Item size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Allocate a typed buffer for this item type
    pub fn instantiate(&self, props: &BufferProperties) -> Result<Box<dyn OutputBuffer>, BufferError> {
        (self.instantiate)(props)
    }
}

impl PartialEq for ItemType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for ItemType {}

impl fmt::Debug for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}({}B)", self.name, self.size)
    }
}

/// Direction of a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PortDirection::Input => f.write_str("input"),
            PortDirection::Output => f.write_str("output"),
        }
    }
}

/// Allowed stream port count and per-port item types of one direction.
///
/// When more ports are connected than item types are listed, the last item
/// type repeats.
#[derive(Debug, Clone, PartialEq)]
pub struct IoSignature {
    min: usize,
    max: Option<usize>,
    items: Vec<ItemType>,
}

impl IoSignature {
    /// No stream ports
    pub fn empty() -> Self {
        Self {
            min: 0,
            max: Some(0),
            items: Vec::new(),
        }
    }

    /// Exactly one port of `T`
    pub fn single<T: Item>() -> Self {
        Self::new::<T>(1, Some(1))
    }

    /// Between `min` and `max` ports of `T`; `None` means unbounded
    pub fn new<T: Item>(min: usize, max: Option<usize>) -> Self {
        Self::with_types(min, max, vec![ItemType::of::<T>()])
    }

    pub fn with_types(min: usize, max: Option<usize>, items: Vec<ItemType>) -> Self {
        Self { min, max, items }
    }

    pub fn min_streams(&self) -> usize {
        self.min
    }

    pub fn max_streams(&self) -> Option<usize> {
        self.max
    }

    pub fn is_empty(&self) -> bool {
        self.max == Some(0) || self.items.is_empty()
    }

    /// Item type of `port`, or `None` if the port index is out of range
    pub fn item_type(&self, port: usize) -> Option<ItemType> {
        if !self.allows_port(port) {
            return None;
        }
        self.items.get(port).or(self.items.last()).copied()
    }

    pub fn allows_port(&self, port: usize) -> bool {
        self.max.is_none_or(|max| port < max)
    }

    pub fn allows_count(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }

    pub(crate) fn max_label(&self) -> String {
        match self.max {
            Some(max) => max.to_string(),
            None => "unbounded".to_string(),
        }
    }
}

/// A stream port on a specific block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortRef {
    pub block: BlockId,
    pub port: usize,
}

impl PortRef {
    pub fn new(block: BlockId, port: usize) -> Self {
        Self { block, port }
    }
}

/// Buffer sizing hints and factory for one output port
#[derive(Clone, Default)]
pub struct BufferPolicy {
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    pub factory: Option<Arc<dyn BufferFactory>>,
}

impl BufferPolicy {
    pub fn with_min_items(mut self, n: usize) -> Self {
        self.min_items = Some(n);
        self
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = Some(n);
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn BufferFactory>) -> Self {
        self.factory = Some(factory);
        self
    }
}

impl fmt::Debug for BufferPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferPolicy")
            .field("min_items", &self.min_items)
            .field("max_items", &self.max_items)
            .field("factory", &self.factory.as_ref().map(|fac| fac.name().to_string()))
            .finish()
    }
}
