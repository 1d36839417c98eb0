//! Single-writer, multi-reader circular item buffers
//!
//! A [`Buffer`] owns a ring of `num_items` slots. Wraparound-free windows are
//! provided by mirroring: the ring is backed by `2 * num_items` slots and every
//! committed item is copied into its twin half, so any run of at most
//! `num_items` consecutive items is contiguous in memory. This gives the same
//! pointer view as mapping the pages twice, without OS support.
//!
//! Cursor discipline:
//! - the write side is owned by exactly one [`Buffer`] handle (not `Clone`);
//! - each [`BufferReader`] owns its own read cursor;
//! - `total_written - total_read + reserve - 1 <= num_items` holds for every
//!   live reader, so the writer never touches slots a reader may still look at.

use std::any::Any;
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use super::errors::BufferError;
use super::notify::Notifier;
use super::ports::{Item, ItemType};
use super::reader::{BufferReader, InputBuffer};
use super::tag::{Tag, TagStore};
use super::tracker::{AllocationTracker, Resource, TrackerGuard};

/// Allocation ceiling used by [`make_buffer`]
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 256 * 1024 * 1024;

// ────────────────────────────────────────────────────────────────────────────
// Ring: mirrored slot storage
// ────────────────────────────────────────────────────────────────────────────

struct Ring<T> {
    slots: Box<[UnsafeCell<T>]>,
    capacity: usize,
}

// SAFETY: slots are only accessed through `slice`, `slice_mut` and `mirror`,
// whose callers uphold the cursor discipline described in the module docs:
// the writer and the readers always touch disjoint slot ranges.
unsafe impl<T: Send + Sync> Sync for Ring<T> {}

impl<T: Item> Ring<T> {
    fn allocate(capacity: usize, name: &str) -> Result<Self, BufferError> {
        let len = capacity.checked_mul(2).ok_or_else(|| BufferError::Allocation {
            name: name.to_string(),
            bytes: usize::MAX,
        })?;
        let mut slots: Vec<UnsafeCell<T>> = Vec::new();
        slots
            .try_reserve_exact(len)
            .map_err(|_| BufferError::Allocation {
                name: name.to_string(),
                bytes: len.saturating_mul(size_of::<T>()),
            })?;
        slots.resize_with(len, || UnsafeCell::new(T::default()));
        Ok(Self {
            slots: slots.into_boxed_slice(),
            capacity,
        })
    }

    fn base(&self) -> *mut T {
        UnsafeCell::raw_get(self.slots.as_ptr())
    }

    /// # Safety
    ///
    /// `start + len <= 2 * capacity`, and no mutable access to these slots or
    /// their mirrors may happen while the returned slice is alive.
    unsafe fn slice(&self, start: usize, len: usize) -> &[T] {
        debug_assert!(start + len <= self.slots.len());
        unsafe { std::slice::from_raw_parts(self.base().add(start), len) }
    }

    /// # Safety
    ///
    /// `start + len <= 2 * capacity`, and no other access to these slots or
    /// their mirrors may happen while the returned slice is alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, start: usize, len: usize) -> &mut [T] {
        debug_assert!(start + len <= self.slots.len());
        unsafe { std::slice::from_raw_parts_mut(self.base().add(start), len) }
    }

    /// Copy the slots `[start, start + len)` into their twin half.
    ///
    /// # Safety
    ///
    /// Same exclusivity as [`Ring::slice_mut`] over the range and its mirror;
    /// `start < capacity` and `len <= capacity`.
    unsafe fn mirror(&self, start: usize, len: usize) {
        let cap = self.capacity;
        let base = self.base();
        let end = start + len;

        let lower_end = end.min(cap);
        if start < lower_end {
            unsafe { ptr::copy_nonoverlapping(base.add(start), base.add(start + cap), lower_end - start) };
        }
        let upper_start = start.max(cap);
        if upper_start < end {
            unsafe {
                ptr::copy_nonoverlapping(base.add(upper_start), base.add(upper_start - cap), end - upper_start)
            };
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Shared state
// ────────────────────────────────────────────────────────────────────────────

/// Cursor state of one reader, shared weakly with the buffer
pub(crate) struct ReaderState {
    pub(crate) total_read: AtomicU64,
    pub(crate) history: AtomicUsize,
    /// Look-behind the writer always leaves intact; fixed at attach time
    pub(crate) reserve: usize,
    pub(crate) done: AtomicBool,
    pub(crate) waker: OnceLock<Notifier>,
}

pub(crate) struct BufferCore<T> {
    ring: Ring<T>,
    name: String,
    total_written: AtomicU64,
    done: AtomicBool,
    readers: Mutex<Vec<Weak<ReaderState>>>,
    tags: Mutex<TagStore>,
    writer_waker: OnceLock<Notifier>,
    _guard: Option<TrackerGuard>,
}

impl<T: Item> BufferCore<T> {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn num_items(&self) -> usize {
        self.ring.capacity
    }

    pub(crate) fn total_written(&self) -> u64 {
        self.total_written.load(Ordering::Acquire)
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn live_readers(&self) -> Vec<Arc<ReaderState>> {
        let mut readers = self.readers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut live = Vec::with_capacity(readers.len());
        readers.retain(|weak| match weak.upgrade() {
            Some(state) => {
                live.push(state);
                true
            }
            None => false,
        });
        live
    }

    fn space_available(&self) -> usize {
        let written = self.total_written();
        let occupied = self
            .live_readers()
            .iter()
            .filter(|r| !r.done.load(Ordering::Acquire))
            .map(|r| written - r.total_read.load(Ordering::Acquire) + (r.reserve as u64 - 1))
            .max()
            .unwrap_or(0);
        (self.ring.capacity as u64).saturating_sub(occupied) as usize
    }

    /// Oldest offset any live reader may still observe
    fn retained_from(&self) -> u64 {
        let written = self.total_written();
        self.live_readers()
            .iter()
            .filter(|r| !r.done.load(Ordering::Acquire))
            .map(|r| {
                r.total_read
                    .load(Ordering::Acquire)
                    .saturating_sub(r.reserve as u64 - 1)
            })
            .min()
            .unwrap_or(written)
    }

    pub(crate) fn tags_in_window(&self, start: u64, end: u64) -> Vec<Tag> {
        self.tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_window(start, end)
    }

    /// `lookbehind + len` slots ending `len` items past `read`
    ///
    /// # Safety
    ///
    /// The caller is a live reader whose cursor is `read`, and
    /// `lookbehind <= reserve - 1`, `len <= total_written - read`.
    pub(crate) unsafe fn read_slice(&self, read: u64, lookbehind: usize, len: usize) -> &[T] {
        let cap = self.ring.capacity;
        let start = ((read % cap as u64) as usize + cap - lookbehind) % cap;
        unsafe { self.ring.slice(start, lookbehind + len) }
    }

    pub(crate) fn wake_readers(&self) {
        for reader in self.live_readers() {
            if let Some(waker) = reader.waker.get() {
                waker.notify();
            }
        }
    }

    pub(crate) fn wake_writer(&self) {
        if let Some(waker) = self.writer_waker.get() {
            waker.notify();
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Buffer: the write side
// ────────────────────────────────────────────────────────────────────────────

/// Parameters handed to a [`BufferFactory`]
#[derive(Debug, Clone)]
pub struct BufferProperties {
    pub num_items: usize,
    pub item_type: ItemType,
    /// Name used in logs, usually `block:port`
    pub name: String,
    /// Allocation ceiling in bytes for the whole backing store
    pub max_bytes: usize,
    pub tracker: AllocationTracker,
}

impl BufferProperties {
    pub fn item_size(&self) -> usize {
        self.item_type.size()
    }
}

/// Allocate a buffer of `num_items` items of `T`.
///
/// Fails when `T` is zero-sized or `num_items` is zero.
pub fn make_buffer<T: Item>(num_items: usize) -> Result<Buffer<T>, BufferError> {
    Buffer::new(num_items)
}

/// Write side of a circular buffer; see the module docs.
pub struct Buffer<T: Item> {
    core: Arc<BufferCore<T>>,
}

impl<T: Item> Buffer<T> {
    pub fn new(num_items: usize) -> Result<Self, BufferError> {
        Self::allocate(num_items, "buffer".to_string(), DEFAULT_MAX_BUFFER_BYTES, None)
    }

    pub fn from_properties(props: &BufferProperties) -> Result<Self, BufferError> {
        if props.item_type != ItemType::of::<T>() {
            return Err(BufferError::ItemTypeMismatch {
                buffer: std::any::type_name::<T>(),
                reader: props.item_type.name(),
            });
        }
        Self::allocate(
            props.num_items,
            props.name.clone(),
            props.max_bytes,
            Some(&props.tracker),
        )
    }

    fn allocate(
        num_items: usize,
        name: String,
        max_bytes: usize,
        tracker: Option<&AllocationTracker>,
    ) -> Result<Self, BufferError> {
        let item_size = size_of::<T>();
        if item_size == 0 {
            return Err(BufferError::ZeroItemSize);
        }
        if num_items < 1 {
            return Err(BufferError::ZeroCapacity);
        }
        let exhausted = || BufferError::ResourceExhausted {
            num_items,
            item_size,
            limit: max_bytes,
        };
        let bytes = num_items
            .checked_mul(item_size)
            .and_then(|b| b.checked_mul(2))
            .ok_or_else(exhausted)?;
        if bytes > max_bytes {
            return Err(exhausted());
        }

        let ring = Ring::allocate(num_items, &name)?;
        Ok(Self {
            core: Arc::new(BufferCore {
                ring,
                name,
                total_written: AtomicU64::new(0),
                done: AtomicBool::new(false),
                readers: Mutex::new(Vec::new()),
                tags: Mutex::new(TagStore::default()),
                writer_waker: OnceLock::new(),
                _guard: tracker.map(|t| t.acquire(Resource::Buffer)),
            }),
        })
    }

    pub fn name(&self) -> &str {
        self.core.name()
    }

    pub fn num_items(&self) -> usize {
        self.core.num_items()
    }

    pub fn total_written(&self) -> u64 {
        self.core.total_written()
    }

    /// Free slots, counting every live reader's unread items and look-behind
    pub fn space_available(&self) -> usize {
        self.core.space_available()
    }

    /// Contiguous writable window covering all free slots
    pub fn write_pointer(&mut self) -> &mut [T] {
        let space = self.space_available();
        self.write_window(space)
    }

    /// Contiguous writable window of `len` items.
    ///
    /// # Panics
    ///
    /// Panics if `len` exceeds [`Buffer::space_available`].
    pub fn write_window(&mut self, len: usize) -> &mut [T] {
        let space = self.space_available();
        assert!(
            len <= space,
            "write window of {len} items exceeds {space} free slots in '{}'",
            self.core.name
        );
        let start = (self.total_written() % self.num_items() as u64) as usize;
        // SAFETY: `&mut self` makes this the only write window, and the
        // free-space check keeps it clear of every reader's slots.
        unsafe { self.core.ring.slice_mut(start, len) }
    }

    /// Publish `n` items written through the write window.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`Buffer::space_available`].
    pub fn update_write_pointer(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let space = self.space_available();
        assert!(
            n <= space,
            "commit of {n} items exceeds {space} free slots in '{}'",
            self.core.name
        );
        let written = self.total_written();
        let start = (written % self.num_items() as u64) as usize;
        // SAFETY: same window as handed out by `write_window`.
        unsafe { self.core.ring.mirror(start, n) };
        self.core
            .total_written
            .store(written + n as u64, Ordering::Release);

        let retained = self.core.retained_from();
        self.core
            .tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .prune_before(retained);
        self.core.wake_readers();
    }

    /// Attach `tag` at its absolute offset
    pub fn add_item_tag(&mut self, tag: Tag) {
        self.core
            .tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tag);
    }

    /// Number of tags still retained
    pub fn tag_count(&self) -> usize {
        self.core
            .tags
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Attach a reader starting at the current write position with
    /// `history - 1` items of look-behind.
    pub fn add_reader(&self, history: usize) -> Result<BufferReader<T>, BufferError> {
        self.attach_reader(history, history, None)
    }

    /// Attach a reader whose look-behind may later grow up to `reserve`
    pub fn add_reader_with_reserve(
        &self,
        history: usize,
        reserve: usize,
    ) -> Result<BufferReader<T>, BufferError> {
        self.attach_reader(history, reserve, None)
    }

    pub(crate) fn attach_reader(
        &self,
        history: usize,
        reserve: usize,
        tracker: Option<&AllocationTracker>,
    ) -> Result<BufferReader<T>, BufferError> {
        let history = history.max(1);
        let reserve = reserve.max(history);
        if reserve > self.num_items() {
            return Err(BufferError::HistoryTooLarge {
                history: reserve,
                num_items: self.num_items(),
            });
        }

        let mut readers = self
            .core
            .readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let state = Arc::new(ReaderState {
            total_read: AtomicU64::new(self.total_written()),
            history: AtomicUsize::new(history),
            reserve,
            done: AtomicBool::new(false),
            waker: OnceLock::new(),
        });
        readers.push(Arc::downgrade(&state));
        drop(readers);

        Ok(BufferReader::new(
            Arc::clone(&self.core),
            state,
            tracker.map(|t| t.acquire(Resource::Reader)),
        ))
    }

    /// Mark the stream finished (or not); readers are woken either way
    pub fn set_done(&self, done: bool) {
        self.core.done.store(done, Ordering::Release);
        self.core.wake_readers();
    }

    pub fn is_done(&self) -> bool {
        self.core.is_done()
    }

    /// True when no live reader still wants data
    pub fn all_readers_done(&self) -> bool {
        self.core
            .live_readers()
            .iter()
            .all(|r| r.done.load(Ordering::Acquire))
    }

    pub fn num_readers(&self) -> usize {
        self.core.live_readers().len()
    }

    pub(crate) fn set_waker(&self, notifier: Notifier) {
        let _ = self.core.writer_waker.set(notifier);
    }
}

// A dropped writer can never produce again
impl<T: Item> Drop for Buffer<T> {
    fn drop(&mut self) {
        self.core.done.store(true, Ordering::Release);
        self.core.wake_readers();
    }
}

impl<T: Item> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("name", &self.core.name)
            .field("num_items", &self.num_items())
            .field("total_written", &self.total_written())
            .finish()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Type-erased write side
// ────────────────────────────────────────────────────────────────────────────

/// Object-safe view of a [`Buffer`] used by the graph layer and scheduler
pub trait OutputBuffer: Send {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn name(&self) -> &str;
    fn item_type(&self) -> ItemType;
    fn num_items(&self) -> usize;
    fn total_written(&self) -> u64;
    fn space_available(&self) -> usize;
    fn update_write_pointer(&mut self, n: usize);
    fn add_item_tag(&mut self, tag: Tag);
    fn attach_reader(
        &self,
        history: usize,
        reserve: usize,
        tracker: &AllocationTracker,
    ) -> Result<Box<dyn InputBuffer>, BufferError>;
    fn set_done(&self, done: bool);
    fn is_done(&self) -> bool;
    fn all_readers_done(&self) -> bool;
    fn set_waker(&self, notifier: Notifier);
}

impl<T: Item> OutputBuffer for Buffer<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn name(&self) -> &str {
        Buffer::name(self)
    }

    fn item_type(&self) -> ItemType {
        ItemType::of::<T>()
    }

    fn num_items(&self) -> usize {
        Buffer::num_items(self)
    }

    fn total_written(&self) -> u64 {
        Buffer::total_written(self)
    }

    fn space_available(&self) -> usize {
        Buffer::space_available(self)
    }

    fn update_write_pointer(&mut self, n: usize) {
        Buffer::update_write_pointer(self, n)
    }

    fn add_item_tag(&mut self, tag: Tag) {
        Buffer::add_item_tag(self, tag)
    }

    fn attach_reader(
        &self,
        history: usize,
        reserve: usize,
        tracker: &AllocationTracker,
    ) -> Result<Box<dyn InputBuffer>, BufferError> {
        let reader = Buffer::attach_reader(self, history, reserve, Some(tracker))?;
        Ok(Box::new(reader))
    }

    fn set_done(&self, done: bool) {
        Buffer::set_done(self, done)
    }

    fn is_done(&self) -> bool {
        Buffer::is_done(self)
    }

    fn all_readers_done(&self) -> bool {
        Buffer::all_readers_done(self)
    }

    fn set_waker(&self, notifier: Notifier) {
        Buffer::set_waker(self, notifier)
    }
}

/// Pluggable buffer construction for an output port
pub trait BufferFactory: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    fn create(&self, props: &BufferProperties) -> Result<Box<dyn OutputBuffer>, BufferError>;
}

/// In-process mirrored ring buffer
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBufferFactory;

impl BufferFactory for DefaultBufferFactory {
    fn name(&self) -> &str {
        "default"
    }

    fn create(&self, props: &BufferProperties) -> Result<Box<dyn OutputBuffer>, BufferError> {
        props.item_type.instantiate(props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_zero_sizes() {
        assert!(matches!(make_buffer::<()>(16), Err(BufferError::ZeroItemSize)));
        assert!(matches!(make_buffer::<f32>(0), Err(BufferError::ZeroCapacity)));
    }

    #[test]
    fn test_resource_exhaustion() {
        let props = BufferProperties {
            num_items: 1024,
            item_type: ItemType::of::<u64>(),
            name: "big".to_string(),
            max_bytes: 1024,
            tracker: AllocationTracker::new(),
        };
        assert!(matches!(
            Buffer::<u64>::from_properties(&props),
            Err(BufferError::ResourceExhausted { .. })
        ));
    }

    #[test]
    fn test_write_then_read_across_wrap() {
        let mut buf = make_buffer::<u32>(8).unwrap();
        let mut reader = buf.add_reader(1).unwrap();

        let mut next = 0u32;
        for round in 0..10 {
            let n = 5;
            let window = buf.write_window(n);
            for slot in window.iter_mut() {
                *slot = next;
                next += 1;
            }
            buf.update_write_pointer(n);

            let data = reader.read_pointer().to_vec();
            let first = round * 5;
            assert_eq!(data, (first..first + 5).collect::<Vec<u32>>());
            reader.update_read_pointer(5);
        }
        assert_eq!(buf.total_written(), 50);
        assert_eq!(reader.total_read(), 50);
    }

    #[test]
    fn test_space_tracks_slowest_reader() {
        let mut buf = make_buffer::<u8>(10).unwrap();
        let mut fast = buf.add_reader(1).unwrap();
        let slow = buf.add_reader(1).unwrap();

        assert_eq!(buf.space_available(), 10);
        buf.write_window(6).fill(1);
        buf.update_write_pointer(6);
        fast.update_read_pointer(6);
        assert_eq!(buf.space_available(), 4);
        assert_eq!(slow.items_available(), 6);

        drop(slow);
        assert_eq!(buf.space_available(), 10);
    }

    #[test]
    fn test_done_reader_releases_space() {
        let mut buf = make_buffer::<u8>(4).unwrap();
        let mut reader = buf.add_reader(1).unwrap();
        buf.write_pointer().fill(7);
        buf.update_write_pointer(4);
        assert_eq!(buf.space_available(), 0);
        assert!(!buf.all_readers_done());

        reader.set_done();
        assert_eq!(buf.space_available(), 4);
        assert!(buf.all_readers_done());
    }

    #[test]
    #[should_panic]
    fn test_overcommit_panics() {
        let mut buf = make_buffer::<u8>(4).unwrap();
        let _reader = buf.add_reader(1).unwrap();
        buf.update_write_pointer(5);
    }

    #[test]
    fn test_late_reader_sees_only_future_items() {
        let mut buf = make_buffer::<i16>(8).unwrap();
        let early = buf.add_reader(1).unwrap();
        buf.write_window(3).copy_from_slice(&[1, 2, 3]);
        buf.update_write_pointer(3);

        let late = buf.add_reader(1).unwrap();
        assert_eq!(early.items_available(), 3);
        assert_eq!(late.items_available(), 0);
        assert_eq!(late.total_read(), 3);
    }

    #[test]
    fn test_history_zero_preload_and_lookbehind() {
        let mut buf = make_buffer::<i32>(8).unwrap();
        let mut reader = buf.add_reader(3).unwrap();
        // Look-behind is reserved before the first write
        assert_eq!(buf.space_available(), 6);

        buf.write_window(4).copy_from_slice(&[1, 2, 3, 4]);
        buf.update_write_pointer(4);
        assert_eq!(reader.read_window(4), &[0, 0, 1, 2, 3, 4]);

        reader.update_read_pointer(2);
        assert_eq!(reader.read_window(2), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_reader_history_limited_by_reserve() {
        let buf = make_buffer::<f32>(16).unwrap();
        let mut reader = buf.add_reader_with_reserve(1, 4).unwrap();
        assert!(reader.set_history(4).is_ok());
        assert!(matches!(
            reader.set_history(5),
            Err(BufferError::HistoryAboveReserve { .. })
        ));
        assert!(matches!(
            buf.add_reader(17),
            Err(BufferError::HistoryTooLarge { .. })
        ));
    }

    #[test]
    fn test_tags_visible_to_every_reader_and_pruned() {
        let mut buf = make_buffer::<u8>(16).unwrap();
        let mut a = buf.add_reader(1).unwrap();
        let b = buf.add_reader(1).unwrap();

        buf.add_item_tag(Tag::new(2, "burst", true));
        buf.write_window(8).fill(0);
        buf.update_write_pointer(8);

        assert_eq!(a.tags_in_window(0, 8).len(), 1);
        assert_eq!(b.tags_in_window(2, 3).len(), 1);
        assert!(b.tags_in_window(3, 8).is_empty());

        // Reader b still retains offset 2
        a.update_read_pointer(8);
        buf.update_write_pointer(0);
        assert_eq!(buf.tag_count(), 1);

        drop(b);
        buf.write_window(1).fill(0);
        buf.update_write_pointer(1);
        assert_eq!(buf.tag_count(), 0);
    }

    #[test]
    fn test_tracker_counts_buffers_and_readers() {
        let tracker = AllocationTracker::new();
        let props = BufferProperties {
            num_items: 32,
            item_type: ItemType::of::<f32>(),
            name: "src:0".to_string(),
            max_bytes: DEFAULT_MAX_BUFFER_BYTES,
            tracker: tracker.clone(),
        };
        let buf = DefaultBufferFactory.create(&props).unwrap();
        let reader = buf.attach_reader(1, 1, &tracker).unwrap();
        assert_eq!(tracker.live(Resource::Buffer), 1);
        assert_eq!(tracker.live(Resource::Reader), 1);

        drop(buf);
        // The reader keeps the storage alive
        assert_eq!(tracker.live(Resource::Buffer), 1);
        drop(reader);
        assert_eq!(tracker.live(Resource::Buffer), 0);
        assert_eq!(tracker.live(Resource::Reader), 0);
    }

    #[test]
    fn test_concurrent_reader_sees_every_item_in_order() {
        let mut buf = make_buffer::<u64>(64).unwrap();
        let mut reader = buf.add_reader(1).unwrap();
        const TOTAL: u64 = 100_000;

        let consumer = std::thread::spawn(move || {
            let mut expected = 0u64;
            while expected < TOTAL {
                let n = reader.items_available();
                if n == 0 {
                    std::thread::yield_now();
                    continue;
                }
                for value in reader.read_pointer() {
                    assert_eq!(*value, expected);
                    expected += 1;
                }
                reader.update_read_pointer(n);
            }
        });

        let mut next = 0u64;
        while next < TOTAL {
            let n = buf.space_available().min((TOTAL - next) as usize);
            if n == 0 {
                std::thread::yield_now();
                continue;
            }
            for slot in buf.write_window(n) {
                *slot = next;
                next += 1;
            }
            buf.update_write_pointer(n);
        }
        consumer.join().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Write(usize),
        Read(usize, usize),
    }

    fn ops() -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(
            prop_oneof![
                (0usize..20).prop_map(Op::Write),
                (0usize..3, 0usize..20).prop_map(|(r, n)| Op::Read(r, n)),
            ],
            0..200,
        )
    }

    proptest! {
        #[test]
        fn prop_no_overwrite_and_reader_isolation(capacity in 1usize..32, ops in ops()) {
            let mut buf = make_buffer::<u32>(capacity).unwrap();
            let mut readers: Vec<_> = (0..3).map(|_| buf.add_reader(1).unwrap()).collect();
            let mut expected = vec![0u32; 3];
            let mut next = 0u32;

            for op in ops {
                match op {
                    Op::Write(n) => {
                        let n = n.min(buf.space_available());
                        for slot in buf.write_window(n) {
                            *slot = next;
                            next += 1;
                        }
                        buf.update_write_pointer(n);
                    }
                    Op::Read(r, n) => {
                        let n = n.min(readers[r].items_available());
                        for value in &readers[r].read_pointer()[..n] {
                            prop_assert_eq!(*value, expected[r]);
                            expected[r] += 1;
                        }
                        readers[r].update_read_pointer(n);
                    }
                }
                let min_read = readers.iter().map(|r| r.total_read()).min().unwrap();
                prop_assert!(buf.total_written() - min_read <= capacity as u64);
            }
        }
    }
}
