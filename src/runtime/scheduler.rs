//! Worker threads for a built flowgraph
//!
//! Each worker owns the executors of one partition (or of one block with
//! [`ThreadingMode::PerBlock`]) and runs them round-robin until every one is
//! done. A worker with nothing to do sleeps on its [`Notifier`], which buffer
//! neighbours, message senders and [`Scheduler::stop`] signal.
//!
//! A hard error from one block aborts every worker of its partition. Other
//! partitions keep running; the failure is reported on
//! [`Scheduler::failures`] and in the [`RunReport`] returned by
//! [`Scheduler::wait`].

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender, channel};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, error, info};

use super::block::Block;
use super::buffer::OutputBuffer;
use super::errors::{GraphError, WorkError};
use super::executor::{BlockExecutor, BlockStats, Control, ExecutorParts, Step, Subscriber};
use super::graph::{BlockId, MessageEdge};
use super::notify::Notifier;
use super::pmt::{Pmt, Symbol};
use super::ports::PortDirection;
use super::reader::InputBuffer;
use super::tracker::{AllocationTracker, Resource};
use super::watchdog::Watchdog;
use crate::config::{RuntimeConfig, ThreadingMode};

/// A started block with its buffers, ready to be handed to a worker
pub(crate) struct PreparedBlock {
    pub(crate) id: BlockId,
    pub(crate) name: String,
    pub(crate) block: Box<dyn Block>,
    pub(crate) readers: Vec<Box<dyn InputBuffer>>,
    pub(crate) writers: Vec<Box<dyn OutputBuffer>>,
}

/// A hard block error, reported once per aborted partition
#[derive(Debug, Clone)]
pub struct BlockFailure {
    /// Index into [`crate::runtime::FlowGraph::partition`]
    pub partition: usize,
    pub block: String,
    pub error: Arc<WorkError>,
}

impl fmt::Display for BlockFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "block '{}' in partition {} failed: {}",
            self.block, self.partition, self.error
        )
    }
}

/// Outcome of a run, returned by [`Scheduler::wait`]
#[derive(Debug, Default)]
pub struct RunReport {
    pub failures: Vec<BlockFailure>,
    pub stats: Vec<BlockStats>,
    /// True when the run ended through [`Scheduler::stop`]
    pub stopped: bool,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn stats_for(&self, block: &str) -> Option<&BlockStats> {
        self.stats.iter().find(|s| s.name == block)
    }
}

struct WorkerReport {
    thread_name: String,
    stats: Vec<BlockStats>,
    failures: Vec<BlockFailure>,
}

/// Control entry point for one running block
struct BlockHandle {
    sender: Sender<Control>,
    notifier: Notifier,
    message_inputs: Vec<Symbol>,
}

struct Worker {
    name: String,
    partition: usize,
    executors: Vec<BlockExecutor>,
    notifier: Notifier,
    /// Notifiers of every worker in the same partition, this one included
    peers: Vec<Notifier>,
    abort: Arc<AtomicBool>,
    stop_signal: Arc<AtomicBool>,
    idle_wait: Duration,
    failures: Sender<BlockFailure>,
    completion: StdSender<WorkerReport>,
}

impl Worker {
    fn run(self) {
        let Worker {
            name,
            partition,
            mut executors,
            notifier,
            peers,
            abort,
            stop_signal,
            idle_wait,
            failures: failure_tx,
            completion,
        } = self;

        info!("[{}] Worker started with {} blocks", name, executors.len());
        let mut failures = Vec::new();

        loop {
            if stop_signal.load(Ordering::Acquire) {
                info!("[{}] Stop signal received", name);
                break;
            }
            if abort.load(Ordering::Acquire) {
                info!("[{}] Partition {} aborted", name, partition);
                break;
            }

            let seen = notifier.generation();
            let mut progress = false;
            for executor in executors.iter_mut().filter(|e| !e.is_done()) {
                let step = panic::catch_unwind(AssertUnwindSafe(|| executor.run_one()))
                    .unwrap_or_else(|payload| {
                        Err(WorkError::BlockError(format!(
                            "work() panicked: {}",
                            panic_message(&*payload)
                        )))
                    });
                match step {
                    Ok(Step::Progress) | Ok(Step::Done) => progress = true,
                    Ok(Step::Blocked) => {}
                    Err(e) => {
                        error!("[{}] Work error: {}", executor.name(), e);
                        let failure = BlockFailure {
                            partition,
                            block: executor.name().to_string(),
                            error: Arc::new(e),
                        };
                        let _ = failure_tx.send(failure.clone());
                        failures.push(failure);
                        abort.store(true, Ordering::Release);
                        for peer in &peers {
                            peer.notify();
                        }
                        break;
                    }
                }
            }

            if !failures.is_empty() {
                continue;
            }
            if executors.iter().all(|e| e.is_done()) {
                debug!("[{}] All blocks done", name);
                break;
            }
            if !progress {
                notifier.wait_for_change(seen, idle_wait);
            }
        }

        for executor in &mut executors {
            executor.finish();
        }
        let stats = executors.iter().map(|e| e.stats().clone()).collect();

        // Drop buffers before reporting so neighbours see them released
        drop(executors);
        info!("[{}] Worker finished", name);
        let _ = completion.send(WorkerReport {
            thread_name: name,
            stats,
            failures,
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Runs the workers of a built flowgraph
pub struct Scheduler {
    threads: Vec<(String, usize, JoinHandle<()>)>,
    stop_signal: Arc<AtomicBool>,
    notifiers: Vec<Notifier>,
    handles: HashMap<String, BlockHandle>,
    completion_tx: StdSender<WorkerReport>,
    completion_rx: StdReceiver<WorkerReport>,
    failures_rx: Receiver<BlockFailure>,
    watchdog: Watchdog,
    watchdog_thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the workers for already started blocks.
    ///
    /// `partitions` are topologically sorted block ids; `prepared` is indexed
    /// by block id.
    pub(crate) fn launch(
        prepared: Vec<PreparedBlock>,
        partitions: Vec<Vec<BlockId>>,
        message_edges: Vec<MessageEdge>,
        config: RuntimeConfig,
        tracker: AllocationTracker,
    ) -> crate::Result<Self> {
        let watchdog = Watchdog::new(config.watchdog_threshold());
        let watchdog_thread = if config.watchdog.enabled {
            let handle = watchdog
                .start_monitoring_thread()
                .map_err(|source| crate::Error::Spawn {
                    name: "watchdog".to_string(),
                    source,
                })?;
            info!(
                "Watchdog enabled - will report work() calls blocked >{}ms",
                config.watchdog.threshold_ms
            );
            Some(handle)
        } else {
            None
        };

        // Worker groups: (partition, thread name, members)
        let mut groups: Vec<(usize, String, Vec<BlockId>)> = Vec::new();
        for (index, members) in partitions.iter().enumerate() {
            match config.threading {
                ThreadingMode::PerPartition => {
                    groups.push((index, format!("partition-{}", index), members.clone()));
                }
                ThreadingMode::PerBlock => {
                    for &id in members {
                        let name = prepared
                            .get(id.as_usize())
                            .map_or_else(|| id.to_string(), |p| p.name.clone());
                        groups.push((index, name, vec![id]));
                    }
                }
            }
        }

        let notifiers: Vec<Notifier> = groups.iter().map(|_| Notifier::new()).collect();
        let mut notifier_of: HashMap<BlockId, Notifier> = HashMap::new();
        for ((_, _, members), notifier) in groups.iter().zip(&notifiers) {
            for &id in members {
                notifier_of.insert(id, notifier.clone());
            }
        }

        let mut inboxes: HashMap<BlockId, (Sender<Control>, Receiver<Control>)> = prepared
            .iter()
            .map(|p| (p.id, unbounded()))
            .collect();

        let mut subscribers: HashMap<BlockId, HashMap<Symbol, Vec<Subscriber>>> = HashMap::new();
        for edge in &message_edges {
            let (Some((sender, _)), Some(notifier)) =
                (inboxes.get(&edge.dst), notifier_of.get(&edge.dst))
            else {
                continue;
            };
            let dst_name = prepared
                .get(edge.dst.as_usize())
                .map_or_else(|| edge.dst.to_string(), |p| p.name.clone());
            subscribers
                .entry(edge.src)
                .or_default()
                .entry(edge.src_port.clone())
                .or_default()
                .push(Subscriber {
                    block: dst_name,
                    port: edge.dst_port.clone(),
                    sender: sender.clone(),
                    notifier: notifier.clone(),
                });
        }

        let stream_blocks = prepared
            .iter()
            .filter(|p| !p.readers.is_empty() || !p.writers.is_empty())
            .count();
        let stream_active = Arc::new(AtomicUsize::new(stream_blocks));

        let mut handles = HashMap::new();
        let mut executors: HashMap<BlockId, BlockExecutor> = HashMap::new();
        for block in prepared {
            let Some((sender, inbox)) = inboxes.remove(&block.id) else {
                continue;
            };
            let Some(notifier) = notifier_of.get(&block.id) else {
                continue;
            };
            handles.insert(
                block.name.clone(),
                BlockHandle {
                    sender,
                    notifier: notifier.clone(),
                    message_inputs: block.block.message_inputs(),
                },
            );
            let executor = BlockExecutor::new(ExecutorParts {
                id: block.id,
                watchdog: watchdog.register_block(&block.name),
                guard: tracker.acquire(Resource::Block),
                name: block.name,
                block: block.block,
                readers: block.readers,
                writers: block.writers,
                inbox,
                subscribers: subscribers.remove(&block.id).unwrap_or_default(),
                stream_active: Arc::clone(&stream_active),
            });
            executor.bind(notifier);
            executors.insert(executor.id(), executor);
        }

        let stop_signal = Arc::new(AtomicBool::new(false));
        let (completion_tx, completion_rx) = channel();
        let (failures_tx, failures_rx) = unbounded();

        let mut aborts: HashMap<usize, Arc<AtomicBool>> = HashMap::new();
        let mut peers: HashMap<usize, Vec<Notifier>> = HashMap::new();
        for ((partition, _, _), notifier) in groups.iter().zip(&notifiers) {
            aborts.entry(*partition).or_default();
            peers.entry(*partition).or_default().push(notifier.clone());
        }

        let mut scheduler = Self {
            threads: Vec::with_capacity(groups.len()),
            stop_signal,
            notifiers: notifiers.clone(),
            handles,
            completion_tx,
            completion_rx,
            failures_rx,
            watchdog,
            watchdog_thread,
        };

        for ((partition, name, members), notifier) in groups.into_iter().zip(notifiers) {
            let worker = Worker {
                name: name.clone(),
                partition,
                executors: members.iter().filter_map(|id| executors.remove(id)).collect(),
                notifier,
                peers: peers.get(&partition).cloned().unwrap_or_default(),
                abort: aborts.get(&partition).cloned().unwrap_or_default(),
                stop_signal: Arc::clone(&scheduler.stop_signal),
                idle_wait: config.idle_wait(),
                failures: failures_tx.clone(),
                completion: scheduler.completion_tx.clone(),
            };

            debug!("Starting worker: {} ({} blocks)", name, members.len());
            match thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker.run())
            {
                Ok(handle) => scheduler.threads.push((name, partition, handle)),
                Err(source) => {
                    error!("Failed to spawn worker '{}': {}", name, source);
                    scheduler.stop();
                    let _ = scheduler.wait();
                    return Err(crate::Error::Spawn { name, source });
                }
            }
        }

        info!("Flowgraph running on {} workers", scheduler.threads.len());
        Ok(scheduler)
    }

    /// Get a reference to the watchdog
    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Hard block failures as they happen
    pub fn failures(&self) -> Receiver<BlockFailure> {
        self.failures_rx.clone()
    }

    fn handle(&self, block: &str) -> Result<&BlockHandle, GraphError> {
        self.handles
            .get(block)
            .ok_or_else(|| GraphError::BlockNotFound(block.to_string()))
    }

    fn post(&self, handle: &BlockHandle, control: Control) -> Result<(), GraphError> {
        handle
            .sender
            .send(control)
            .map_err(|_| GraphError::NotRunning)?;
        handle.notifier.notify();
        Ok(())
    }

    /// Queue a parameter change, applied before the block's next `work()`
    pub fn post_parameter(
        &self,
        block: &str,
        name: &str,
        value: impl Into<Pmt>,
    ) -> Result<(), GraphError> {
        let handle = self.handle(block)?;
        self.post(
            handle,
            Control::Parameter {
                name: name.to_string(),
                value: value.into(),
            },
        )
    }

    /// Deliver a message to an input message port of a running block
    pub fn post_message(
        &self,
        block: &str,
        port: &str,
        msg: impl Into<Pmt>,
    ) -> Result<(), GraphError> {
        let handle = self.handle(block)?;
        if !handle.message_inputs.iter().any(|p| p == port) {
            return Err(GraphError::MessagePortNotFound {
                block: block.to_string(),
                port: port.to_string(),
                direction: PortDirection::Input,
            });
        }
        self.post(
            handle,
            Control::Message {
                port: Symbol::new(port),
                msg: msg.into(),
            },
        )
    }

    /// Signal all workers to stop after their current `work()` calls
    pub fn stop(&self) {
        info!("Stopping flowgraph");
        self.stop_signal.store(true, Ordering::Release);
        for notifier in &self.notifiers {
            notifier.notify();
        }
    }

    /// Block until every worker has exited and collect the outcome of the run
    pub fn wait(self) -> RunReport {
        let Scheduler {
            threads,
            stop_signal,
            completion_tx,
            completion_rx,
            watchdog,
            watchdog_thread,
            ..
        } = self;

        // Workers hold the remaining senders, each sends one report on exit
        drop(completion_tx);

        let mut report = RunReport::default();
        let mut reported = HashSet::new();
        for worker in completion_rx.iter() {
            debug!(
                "[{}] Reported {} blocks, {} failures",
                worker.thread_name,
                worker.stats.len(),
                worker.failures.len()
            );
            report.stats.extend(worker.stats);
            report.failures.extend(worker.failures);
            reported.insert(worker.thread_name);
        }

        let nworkers = threads.len();
        for (name, partition, handle) in threads {
            let joined = handle.join();
            if joined.is_ok() && reported.contains(&name) {
                continue;
            }
            error!("[{}] Worker died before reporting", name);
            report.failures.push(BlockFailure {
                partition,
                block: name,
                error: Arc::new(WorkError::BlockError("worker thread panicked".to_string())),
            });
        }

        watchdog.stop();
        if let Some(handle) = watchdog_thread {
            let _ = handle.join();
        }

        report.stopped = stop_signal.load(Ordering::Acquire);
        report.stats.sort_by(|a, b| a.name.cmp(&b.name));
        info!(
            "Flowgraph finished: {} workers, {} failures{}",
            nworkers,
            report.failures.len(),
            if report.stopped { " (stopped)" } else { "" }
        );
        report
    }

    /// Get the number of worker threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// Get the names of all worker threads
    pub fn thread_names(&self) -> Vec<String> {
        self.threads.iter().map(|(name, _, _)| name.clone()).collect()
    }
}
