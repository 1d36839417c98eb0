//! Read side of a [`Buffer`](super::buffer::Buffer)

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::buffer::{BufferCore, OutputBuffer, ReaderState};
use super::errors::BufferError;
use super::notify::Notifier;
use super::ports::{Item, ItemType};
use super::tag::Tag;
use super::tracker::{AllocationTracker, TrackerGuard};

/// One consumer's cursor into a buffer.
///
/// Readers of the same buffer never affect each other except through the
/// writer's free space, which follows the slowest live reader.
pub struct BufferReader<T: Item> {
    core: Arc<BufferCore<T>>,
    state: Arc<ReaderState>,
    _guard: Option<TrackerGuard>,
}

impl<T: Item> BufferReader<T> {
    pub(crate) fn new(
        core: Arc<BufferCore<T>>,
        state: Arc<ReaderState>,
        guard: Option<TrackerGuard>,
    ) -> Self {
        Self {
            core,
            state,
            _guard: guard,
        }
    }

    /// Name of the buffer this reader consumes from
    pub fn buffer_name(&self) -> &str {
        self.core.name()
    }

    pub fn items_available(&self) -> usize {
        (self.core.total_written() - self.total_read()) as usize
    }

    pub fn total_read(&self) -> u64 {
        self.state.total_read.load(Ordering::Acquire)
    }

    /// Unread items, without look-behind
    pub fn read_pointer(&self) -> &[T] {
        let avail = self.items_available();
        // SAFETY: `avail` items past our cursor are committed and the writer
        // keeps clear of them until we advance.
        unsafe { self.core.read_slice(self.total_read(), 0, avail) }
    }

    /// `len` unread items preceded by `history - 1` items of look-behind.
    ///
    /// Look-behind before the start of the stream reads as `T::default()`.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`BufferReader::items_available`].
    pub fn read_window(&self, len: usize) -> &[T] {
        let avail = self.items_available();
        assert!(
            len <= avail,
            "read window of {len} items exceeds {avail} available in '{}'",
            self.core.name()
        );
        let lookbehind = self.history() - 1;
        // SAFETY: look-behind is within the reserve the writer leaves intact.
        unsafe { self.core.read_slice(self.total_read(), lookbehind, len) }
    }

    /// Mark `n` items consumed.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`BufferReader::items_available`].
    pub fn update_read_pointer(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let avail = self.items_available();
        assert!(
            n <= avail,
            "consume of {n} items exceeds {avail} available in '{}'",
            self.core.name()
        );
        self.state.total_read.fetch_add(n as u64, Ordering::AcqRel);
        self.core.wake_writer();
    }

    /// Tags with absolute offsets in `[start, end)`
    pub fn tags_in_window(&self, start: u64, end: u64) -> Vec<Tag> {
        self.core.tags_in_window(start, end)
    }

    pub fn history(&self) -> usize {
        self.state.history.load(Ordering::Acquire)
    }

    /// Change the look-behind; it may not exceed the reserve fixed at attach
    pub fn set_history(&mut self, history: usize) -> Result<(), BufferError> {
        let history = history.max(1);
        if history > self.state.reserve {
            return Err(BufferError::HistoryAboveReserve {
                history,
                reserve: self.state.reserve,
            });
        }
        self.state.history.store(history, Ordering::Release);
        Ok(())
    }

    pub fn reserve(&self) -> usize {
        self.state.reserve
    }

    /// True once the writer declared the stream finished
    pub fn writer_done(&self) -> bool {
        self.core.is_done()
    }

    /// Stop holding back the writer.
    ///
    /// Takes `&mut self` so no window into the buffer can outlive it:
    ///
    /// ```compile_fail
    /// use sdrflow::Buffer;
    ///
    /// let mut buf = Buffer::<f32>::new(16).unwrap();
    /// let mut reader = buf.add_reader(1).unwrap();
    /// buf.write_pointer()[..4].fill(1.0);
    /// buf.update_write_pointer(4);
    ///
    /// let window = reader.read_window(4);
    /// reader.set_done();
    /// assert_eq!(window[0], 1.0);
    /// ```
    pub fn set_done(&mut self) {
        self.state.done.store(true, Ordering::Release);
        self.core.wake_writer();
    }

    pub fn is_done(&self) -> bool {
        self.state.done.load(Ordering::Acquire)
    }

    pub(crate) fn set_waker(&self, notifier: Notifier) {
        let _ = self.state.waker.set(notifier);
    }
}

impl<T: Item> Drop for BufferReader<T> {
    fn drop(&mut self) {
        self.state.done.store(true, Ordering::Release);
        self.core.wake_writer();
    }
}

impl<T: Item> fmt::Debug for BufferReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferReader")
            .field("buffer", &self.core.name())
            .field("total_read", &self.total_read())
            .field("history", &self.history())
            .finish()
    }
}

/// Object-safe view of a [`BufferReader`] used by the graph layer and scheduler
pub trait InputBuffer: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn buffer_name(&self) -> &str;
    fn item_type(&self) -> ItemType;
    fn items_available(&self) -> usize;
    fn total_read(&self) -> u64;
    fn update_read_pointer(&mut self, n: usize);
    fn tags_in_window(&self, start: u64, end: u64) -> Vec<Tag>;
    fn history(&self) -> usize;
    fn set_history(&mut self, history: usize) -> Result<(), BufferError>;
    fn reserve(&self) -> usize;
    fn writer_done(&self) -> bool;
    fn set_done(&mut self);
    fn set_waker(&self, notifier: Notifier);
}

impl<T: Item> InputBuffer for BufferReader<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn buffer_name(&self) -> &str {
        BufferReader::buffer_name(self)
    }

    fn item_type(&self) -> ItemType {
        ItemType::of::<T>()
    }

    fn items_available(&self) -> usize {
        BufferReader::items_available(self)
    }

    fn total_read(&self) -> u64 {
        BufferReader::total_read(self)
    }

    fn update_read_pointer(&mut self, n: usize) {
        BufferReader::update_read_pointer(self, n)
    }

    fn tags_in_window(&self, start: u64, end: u64) -> Vec<Tag> {
        BufferReader::tags_in_window(self, start, end)
    }

    fn history(&self) -> usize {
        BufferReader::history(self)
    }

    fn set_history(&mut self, history: usize) -> Result<(), BufferError> {
        BufferReader::set_history(self, history)
    }

    fn reserve(&self) -> usize {
        BufferReader::reserve(self)
    }

    fn writer_done(&self) -> bool {
        BufferReader::writer_done(self)
    }

    fn set_done(&mut self) {
        BufferReader::set_done(self)
    }

    fn set_waker(&self, notifier: Notifier) {
        BufferReader::set_waker(self, notifier)
    }
}

/// Pluggable reader construction for an edge
pub trait ReaderFactory: Send + Sync {
    fn attach(
        &self,
        buffer: &dyn OutputBuffer,
        history: usize,
        reserve: usize,
        tracker: &AllocationTracker,
    ) -> Result<Box<dyn InputBuffer>, BufferError>;
}

/// Attaches a plain [`BufferReader`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultReaderFactory;

impl ReaderFactory for DefaultReaderFactory {
    fn attach(
        &self,
        buffer: &dyn OutputBuffer,
        history: usize,
        reserve: usize,
        tracker: &AllocationTracker,
    ) -> Result<Box<dyn InputBuffer>, BufferError> {
        buffer.attach_reader(history, reserve, tracker)
    }
}
