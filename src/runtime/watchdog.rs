//! Watchdog for `work()` calls that block too long
//!
//! Low-overhead monitoring using atomic timestamps instead of locks.
//! Each block stores the start time of its current `work()` call in an atomic
//! variable, and the watchdog thread periodically scans these timestamps.
//! Blocked calls are reported, never interrupted.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Shared state for a single block's operation tracking
struct BlockState {
    /// Milliseconds since the watchdog epoch, plus one; 0 while idle
    op_start: AtomicU64,
    /// Track if we've already warned about the current operation
    has_warned: AtomicBool,
    block_name: String,
    operation: &'static str,
}

/// Handle to a block's watchdog state, held by its executor
#[derive(Clone)]
pub struct WatchdogHandle {
    state: Arc<BlockState>,
    epoch: Instant,
}

impl WatchdogHandle {
    fn now(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + 1
    }

    /// Mark the start of a potentially blocking operation
    #[inline(always)]
    pub fn start_operation(&self) {
        self.state.op_start.store(self.now(), Ordering::Relaxed);
        self.state.has_warned.store(false, Ordering::Relaxed);
    }

    /// Mark the end of the operation
    #[inline(always)]
    pub fn finish_operation(&self) {
        if self.state.has_warned.swap(false, Ordering::Relaxed) {
            info!(
                "[{}] {} unblocked",
                self.state.block_name, self.state.operation
            );
        }
        self.state.op_start.store(0, Ordering::Relaxed);
    }

    /// RAII guard covering one operation
    pub fn guard(&self) -> OperationGuard<'_> {
        OperationGuard::new(self)
    }
}

/// Shared watchdog state
#[derive(Clone)]
pub struct Watchdog {
    blocks: Arc<Mutex<Vec<Weak<BlockState>>>>,
    running: Arc<AtomicBool>,
    threshold: Duration,
    epoch: Instant,
}

impl Watchdog {
    /// Create a watchdog reporting operations longer than `threshold`
    pub fn new(threshold: Duration) -> Self {
        Self {
            blocks: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(true)),
            threshold,
            epoch: Instant::now(),
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Register a block for monitoring
    pub fn register_block(&self, block_name: &str) -> WatchdogHandle {
        let state = Arc::new(BlockState {
            op_start: AtomicU64::new(0),
            has_warned: AtomicBool::new(false),
            block_name: block_name.to_string(),
            operation: "work",
        });

        self.blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::downgrade(&state));

        WatchdogHandle {
            state,
            epoch: self.epoch,
        }
    }

    /// Check for blocked operations, returning how many are newly reported
    pub fn check_for_blocked(&self) -> usize {
        let now = self.epoch.elapsed().as_millis() as u64 + 1;
        let threshold_ms = self.threshold.as_millis() as u64;
        let mut reported = 0;

        let mut blocks = self.blocks.lock().unwrap_or_else(PoisonError::into_inner);

        // Remove dead weak references and check live ones
        blocks.retain(|weak| {
            let Some(state) = weak.upgrade() else {
                return false;
            };
            let start = state.op_start.load(Ordering::Relaxed);
            if start > 0 {
                let duration_ms = now.saturating_sub(start);
                // Only warn once per blocking operation
                if duration_ms > threshold_ms && !state.has_warned.swap(true, Ordering::Relaxed) {
                    warn!(
                        "[{}] {} blocked for {:.1}s",
                        state.block_name,
                        state.operation,
                        duration_ms as f64 / 1000.0
                    );
                    reported += 1;
                }
            }
            true
        });
        reported
    }

    /// Start the watchdog monitoring thread
    pub fn start_monitoring_thread(&self) -> std::io::Result<JoinHandle<()>> {
        let watchdog = self.clone();
        let poll = (self.threshold / 2).clamp(Duration::from_millis(10), Duration::from_secs(1));
        std::thread::Builder::new()
            .name("watchdog".to_string())
            .spawn(move || {
                while watchdog.running.load(Ordering::Acquire) {
                    std::thread::sleep(poll);
                    watchdog.check_for_blocked();
                }
            })
    }

    /// Stop the watchdog monitoring thread
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// RAII guard for tracking an operation - near-zero cost (just atomic stores)
pub struct OperationGuard<'a> {
    handle: &'a WatchdogHandle,
}

impl<'a> OperationGuard<'a> {
    #[inline(always)]
    pub fn new(handle: &'a WatchdogHandle) -> Self {
        handle.start_operation();
        Self { handle }
    }
}

impl Drop for OperationGuard<'_> {
    #[inline(always)]
    fn drop(&mut self) {
        self.handle.finish_operation();
    }
}
