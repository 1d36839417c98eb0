//! Stream sinks

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use crate::runtime::block::{Block, WorkStatus};
use crate::runtime::errors::WorkResult;
use crate::runtime::ports::{IoSignature, Item};
use crate::runtime::tag::Tag;
use crate::runtime::work_io::WorkIo;

struct Collected<T> {
    data: Vec<T>,
    tags: Vec<Tag>,
}

/// Shared view of what a [`VectorSink`] received; usable while the graph runs
pub struct VectorSinkHandle<T> {
    shared: Arc<Mutex<Collected<T>>>,
}

impl<T> Clone for VectorSinkHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Item> VectorSinkHandle<T> {
    pub fn data(&self) -> Vec<T> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .clone()
    }

    /// Tags seen on the input, at their absolute offsets
    pub fn tags(&self) -> Vec<Tag> {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tags
            .clone()
    }

    pub fn len(&self) -> usize {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .data
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Collects every input item and tag
pub struct VectorSink<T: Item> {
    name: String,
    shared: Arc<Mutex<Collected<T>>>,
}

impl<T: Item> VectorSink<T> {
    pub fn new() -> Self {
        Self {
            name: "vector_sink".to_string(),
            shared: Arc::new(Mutex::new(Collected {
                data: Vec::new(),
                tags: Vec::new(),
            })),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn handle(&self) -> VectorSinkHandle<T> {
        VectorSinkHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Item> Default for VectorSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for VectorSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.inputs.ninput_items(0);
        let input = io.inputs.slice::<T>(0)?;
        let tags = io.inputs.tags_in_window(0, 0, n);
        {
            let mut shared = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
            shared.data.extend_from_slice(&input[input.len() - n..]);
            shared.tags.extend(tags);
        }
        io.inputs.consume(0, n);
        Ok(WorkStatus::Ok)
    }
}

/// Discards everything on its input
pub struct NullSink<T: Item> {
    name: String,
    _item: PhantomData<T>,
}

impl<T: Item> NullSink<T> {
    pub fn new() -> Self {
        Self {
            name: "null_sink".to_string(),
            _item: PhantomData,
        }
    }
}

impl<T: Item> Default for NullSink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for NullSink<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.inputs.ninput_items(0);
        io.inputs.consume(0, n);
        Ok(WorkStatus::Ok)
    }
}
