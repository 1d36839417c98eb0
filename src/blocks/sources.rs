//! Stream sources
//!
//! Sources have no stream inputs; the scheduler offers them as much output
//! space as is free, rounded to their output multiple.

use std::marker::PhantomData;

use tracing::debug;

use crate::runtime::block::{Block, WorkStatus};
use crate::runtime::errors::WorkResult;
use crate::runtime::ports::{IoSignature, Item};
use crate::runtime::tag::Tag;
use crate::runtime::work_io::WorkIo;

/// Emits the items of a vector, once or repeatedly.
///
/// Tags are given at offsets into the vector and are emitted again on
/// every repetition.
pub struct VectorSource<T: Item> {
    name: String,
    data: Vec<T>,
    tags: Vec<Tag>,
    repeat: bool,
    position: usize,
}

impl<T: Item> VectorSource<T> {
    pub fn new(data: Vec<T>) -> Self {
        Self {
            name: "vector_source".to_string(),
            data,
            tags: Vec::new(),
            repeat: false,
            position: 0,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_tags(mut self, tags: Vec<Tag>) -> Self {
        self.tags = tags;
        self
    }
}

impl<T: Item> Block for VectorSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        if self.data.is_empty() {
            return Ok(WorkStatus::Done);
        }

        let noutput = io.outputs.noutput_items();
        let base = io.outputs.nitems_written(0);
        let mut tags = Vec::new();
        let mut produced = 0;
        {
            let out = io.outputs.slice_mut::<T>(0)?;
            while produced < noutput {
                if self.position == self.data.len() {
                    if !self.repeat {
                        break;
                    }
                    self.position = 0;
                }
                let n = (noutput - produced).min(self.data.len() - self.position);
                let range = self.position..self.position + n;
                out[produced..produced + n].copy_from_slice(&self.data[range.clone()]);

                for tag in &self.tags {
                    let offset = tag.offset as usize;
                    if range.contains(&offset) {
                        let mut tag = tag.clone();
                        tag.offset = base + (produced + offset - self.position) as u64;
                        tags.push(tag);
                    }
                }
                self.position += n;
                produced += n;
            }
        }

        for tag in tags {
            io.outputs.add_item_tag(0, tag);
        }
        io.outputs.produce(0, produced);

        if !self.repeat && self.position == self.data.len() {
            debug!("[{}] All {} items emitted", self.name, self.data.len());
            return Ok(WorkStatus::Done);
        }
        Ok(WorkStatus::Ok)
    }
}

/// Emits `0, 1, 2, ...` as `i32` until `limit` items were produced
pub struct CounterSource {
    name: String,
    next: u64,
    limit: u64,
}

impl CounterSource {
    pub fn new(limit: u64) -> Self {
        Self {
            name: "counter_source".to_string(),
            next: 0,
            limit,
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl Block for CounterSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<i32>()
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let remaining = self.limit - self.next;
        let n = (io.outputs.noutput_items() as u64).min(remaining) as usize;
        let out = io.outputs.slice_mut::<i32>(0)?;
        for (i, item) in out[..n].iter_mut().enumerate() {
            *item = (self.next + i as u64) as i32;
        }
        io.outputs.produce(0, n);
        self.next += n as u64;

        if self.next == self.limit {
            return Ok(WorkStatus::Done);
        }
        Ok(WorkStatus::Ok)
    }
}

/// Endless stream of default (zero) items
pub struct NullSource<T: Item> {
    name: String,
    _item: PhantomData<T>,
}

impl<T: Item> NullSource<T> {
    pub fn new() -> Self {
        Self {
            name: "null_source".to_string(),
            _item: PhantomData,
        }
    }
}

impl<T: Item> Default for NullSource<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Item> Block for NullSource<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::single::<T>()
    }

    fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
        let n = io.outputs.noutput_items();
        io.outputs.slice_mut::<T>(0)?.fill(T::default());
        Ok(WorkStatus::Produced(n))
    }
}
