//! Per-call view of a block's buffers handed to `work()`

use super::buffer::{Buffer, OutputBuffer};
use super::errors::{WorkError, WorkResult};
use super::pmt::{Pmt, Symbol};
use super::ports::Item;
use super::reader::{BufferReader, InputBuffer};
use super::tag::Tag;

/// Everything a block sees during one `work()` call.
///
/// Inputs and outputs are separate fields so input slices can be held while
/// output slices are borrowed mutably.
pub struct WorkIo<'a> {
    pub inputs: Inputs<'a>,
    pub outputs: Outputs<'a>,
    pub messages: &'a mut MessageOutbox,
}

/// Input windows of one `work()` call
pub struct Inputs<'a> {
    readers: &'a [Box<dyn InputBuffer>],
    available: &'a [usize],
    consumed: Vec<usize>,
}

impl<'a> Inputs<'a> {
    pub(crate) fn new(readers: &'a [Box<dyn InputBuffer>], available: &'a [usize]) -> Self {
        Self {
            readers,
            available,
            consumed: vec![0; readers.len()],
        }
    }

    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Unread items offered on `port`
    pub fn ninput_items(&self, port: usize) -> usize {
        self.available.get(port).copied().unwrap_or(0)
    }

    /// Look-behind items preceding the unread items of `port`
    pub fn history(&self, port: usize) -> usize {
        self.readers.get(port).map_or(1, |r| r.history())
    }

    fn reader<T: Item>(&self, port: usize) -> WorkResult<&'a BufferReader<T>> {
        let readers: &'a [Box<dyn InputBuffer>] = self.readers;
        let reader = readers.get(port).ok_or(WorkError::PortIndex(port))?;
        reader
            .as_any()
            .downcast_ref::<BufferReader<T>>()
            .ok_or(WorkError::PortType {
                port,
                expected: std::any::type_name::<T>(),
            })
    }

    /// Items of `port`: `history - 1` look-behind items followed by
    /// [`Inputs::ninput_items`] unread items.
    pub fn slice<T: Item>(&self, port: usize) -> WorkResult<&'a [T]> {
        let n = self.ninput_items(port);
        Ok(self.reader::<T>(port)?.read_window(n))
    }

    /// [`Inputs::slice`] for every port
    pub fn slices<T: Item>(&self) -> WorkResult<Vec<&'a [T]>> {
        (0..self.len()).map(|port| self.slice::<T>(port)).collect()
    }

    /// Report `n` items of `port` consumed
    pub fn consume(&mut self, port: usize, n: usize) {
        if let Some(consumed) = self.consumed.get_mut(port) {
            *consumed += n;
        }
    }

    /// Report `n` items consumed on every port
    pub fn consume_each(&mut self, n: usize) {
        for consumed in &mut self.consumed {
            *consumed += n;
        }
    }

    /// Absolute offset of the first unread item of `port`
    pub fn nitems_read(&self, port: usize) -> u64 {
        self.readers.get(port).map_or(0, |r| r.total_read())
    }

    /// Tags on `port` with absolute offsets in `[start, end)`
    pub fn tags_in_range(&self, port: usize, start: u64, end: u64) -> Vec<Tag> {
        self.readers
            .get(port)
            .map(|r| r.tags_in_window(start, end))
            .unwrap_or_default()
    }

    /// Tags on `port` at offsets relative to the first unread item
    pub fn tags_in_window(&self, port: usize, rel_start: usize, rel_end: usize) -> Vec<Tag> {
        let base = self.nitems_read(port);
        self.tags_in_range(port, base + rel_start as u64, base + rel_end as u64)
    }

    pub(crate) fn into_consumed(self) -> Vec<usize> {
        self.consumed
    }
}

/// Output windows of one `work()` call
pub struct Outputs<'a> {
    writers: &'a mut [Box<dyn OutputBuffer>],
    noutput: usize,
    produced: Vec<usize>,
}

impl<'a> Outputs<'a> {
    pub(crate) fn new(writers: &'a mut [Box<dyn OutputBuffer>], noutput: usize) -> Self {
        let produced = vec![0; writers.len()];
        Self {
            writers,
            noutput,
            produced,
        }
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    /// Items that may be produced on each output in this call
    pub fn noutput_items(&self) -> usize {
        self.noutput
    }

    /// Writable window of `port`, [`Outputs::noutput_items`] long
    pub fn slice_mut<T: Item>(&mut self, port: usize) -> WorkResult<&mut [T]> {
        let n = self.noutput;
        let writer = self.writers.get_mut(port).ok_or(WorkError::PortIndex(port))?;
        let buffer = writer
            .as_any_mut()
            .downcast_mut::<Buffer<T>>()
            .ok_or(WorkError::PortType {
                port,
                expected: std::any::type_name::<T>(),
            })?;
        Ok(buffer.write_window(n))
    }

    /// [`Outputs::slice_mut`] for every port
    pub fn slices_mut<T: Item>(&mut self) -> WorkResult<Vec<&mut [T]>> {
        let n = self.noutput;
        self.writers
            .iter_mut()
            .enumerate()
            .map(|(port, writer)| {
                writer
                    .as_any_mut()
                    .downcast_mut::<Buffer<T>>()
                    .map(|buffer| buffer.write_window(n))
                    .ok_or(WorkError::PortType {
                        port,
                        expected: std::any::type_name::<T>(),
                    })
            })
            .collect()
    }

    /// Report `n` items of `port` produced
    pub fn produce(&mut self, port: usize, n: usize) {
        if let Some(produced) = self.produced.get_mut(port) {
            *produced += n;
        }
    }

    /// Report `n` items produced on every port
    pub fn produce_each(&mut self, n: usize) {
        for produced in &mut self.produced {
            *produced += n;
        }
    }

    /// Absolute offset of the next item written to `port`
    pub fn nitems_written(&self, port: usize) -> u64 {
        self.writers.get(port).map_or(0, |w| w.total_written())
    }

    /// Attach a tag to `port` at its absolute offset
    pub fn add_item_tag(&mut self, port: usize, tag: Tag) {
        if let Some(writer) = self.writers.get_mut(port) {
            writer.add_item_tag(tag);
        }
    }

    pub(crate) fn into_produced(self) -> Vec<usize> {
        self.produced
    }
}

/// Messages posted by a block, delivered to subscribers after the call returns
#[derive(Debug, Default)]
pub struct MessageOutbox {
    pending: Vec<(Symbol, Pmt)>,
}

impl MessageOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `msg` on the output message port `port`
    pub fn post(&mut self, port: impl Into<Symbol>, msg: impl Into<Pmt>) {
        self.pending.push((port.into(), msg.into()));
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, (Symbol, Pmt)> {
        self.pending.drain(..)
    }
}
