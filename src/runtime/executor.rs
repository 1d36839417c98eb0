//! Per-block dispatch state machine
//!
//! A [`BlockExecutor`] owns one block together with its readers and writers
//! and runs one scheduling step at a time: deliver control messages, gather
//! counts, plan the output size, call `work()`, apply the reported counts
//! and propagate tags.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, trace, warn};

use super::block::{Block, TagPropagation, WorkStatus};
use super::buffer::OutputBuffer;
use super::errors::{WorkError, WorkResult};
use super::graph::BlockId;
use super::notify::Notifier;
use super::pmt::{Pmt, Symbol};
use super::rate::{Rate, round_down};
use super::reader::InputBuffer;
use super::tracker::TrackerGuard;
use super::watchdog::WatchdogHandle;
use super::work_io::{Inputs, MessageOutbox, Outputs, WorkIo};

/// Requests delivered to a block between `work()` calls
#[derive(Debug, Clone)]
pub(crate) enum Control {
    Message { port: Symbol, msg: Pmt },
    Parameter { name: String, value: Pmt },
}

/// Destination of a message edge
#[derive(Clone)]
pub(crate) struct Subscriber {
    pub(crate) block: String,
    pub(crate) port: Symbol,
    pub(crate) sender: Sender<Control>,
    pub(crate) notifier: Notifier,
}

/// Result of one scheduling step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Progress,
    Blocked,
    Done,
}

enum Plan {
    Run(usize),
    BlockedOnOutput,
    BlockedOnInput,
}

/// Per-block counters reported after a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub name: String,
    pub work_calls: u64,
    pub items_consumed: u64,
    pub items_produced: u64,
    pub messages_handled: u64,
}

pub(crate) struct BlockExecutor {
    id: BlockId,
    name: String,
    block: Box<dyn Block>,
    readers: Vec<Box<dyn InputBuffer>>,
    writers: Vec<Box<dyn OutputBuffer>>,
    inbox: Receiver<Control>,
    subscribers: HashMap<Symbol, Vec<Subscriber>>,
    outbox: MessageOutbox,
    rate: Rate,
    history: usize,
    output_multiple: usize,
    propagation: TagPropagation,
    /// Stream blocks of the whole graph that have not finished yet
    stream_active: Arc<AtomicUsize>,
    watchdog: WatchdogHandle,
    available: Vec<usize>,
    required: Vec<usize>,
    stats: BlockStats,
    done: bool,
    _guard: TrackerGuard,
}

pub(crate) struct ExecutorParts {
    pub(crate) id: BlockId,
    pub(crate) name: String,
    pub(crate) block: Box<dyn Block>,
    pub(crate) readers: Vec<Box<dyn InputBuffer>>,
    pub(crate) writers: Vec<Box<dyn OutputBuffer>>,
    pub(crate) inbox: Receiver<Control>,
    pub(crate) subscribers: HashMap<Symbol, Vec<Subscriber>>,
    pub(crate) stream_active: Arc<AtomicUsize>,
    pub(crate) watchdog: WatchdogHandle,
    pub(crate) guard: TrackerGuard,
}

impl BlockExecutor {
    pub(crate) fn new(parts: ExecutorParts) -> Self {
        let ExecutorParts {
            id,
            name,
            block,
            readers,
            writers,
            inbox,
            subscribers,
            stream_active,
            watchdog,
            guard,
        } = parts;
        let ninputs = readers.len();
        Self {
            id,
            stats: BlockStats {
                name: name.clone(),
                ..BlockStats::default()
            },
            name,
            rate: block.rate(),
            history: block.history().max(1),
            output_multiple: block.output_multiple().max(1),
            propagation: block.tag_propagation(),
            block,
            readers,
            writers,
            inbox,
            subscribers,
            outbox: MessageOutbox::new(),
            stream_active,
            watchdog,
            available: vec![0; ninputs],
            required: vec![0; ninputs],
            done: false,
            _guard: guard,
        }
    }

    pub(crate) fn id(&self) -> BlockId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn has_stream_ports(&self) -> bool {
        !self.readers.is_empty() || !self.writers.is_empty()
    }

    pub(crate) fn stats(&self) -> &BlockStats {
        &self.stats
    }

    /// Route buffer progress notifications for this block to `notifier`
    pub(crate) fn bind(&self, notifier: &Notifier) {
        for reader in &self.readers {
            reader.set_waker(notifier.clone());
        }
        for writer in &self.writers {
            writer.set_waker(notifier.clone());
        }
    }

    /// Run one scheduling step.
    ///
    /// `Err` is a hard block failure; the caller aborts the partition.
    pub(crate) fn run_one(&mut self) -> WorkResult<Step> {
        if self.done {
            return Ok(Step::Done);
        }

        let handled = self.drain_inbox()?;

        if !self.has_stream_ports() {
            if self.stream_active.load(Ordering::Acquire) == 0 && self.inbox.is_empty() {
                debug!("[{}] Stream blocks finished, message block done", self.name);
                self.finish();
                return Ok(Step::Done);
            }
            return Ok(if handled { Step::Progress } else { Step::Blocked });
        }

        if !self.writers.is_empty() && self.writers.iter().all(|w| w.all_readers_done()) {
            debug!("[{}] All downstream readers done", self.name);
            self.finish();
            return Ok(Step::Done);
        }

        let noutput = match self.plan() {
            Plan::Run(n) => n,
            Plan::BlockedOnOutput => {
                trace!("[{}] Blocked on output space", self.name);
                return Ok(if handled { Step::Progress } else { Step::Blocked });
            }
            Plan::BlockedOnInput => {
                let upstream_done: Vec<bool> = self.readers.iter().map(|r| r.writer_done()).collect();
                if !upstream_done.contains(&true) {
                    trace!("[{}] Blocked on input", self.name);
                    return Ok(if handled { Step::Progress } else { Step::Blocked });
                }
                // A done writer has committed everything; plan again with final counts
                match self.plan() {
                    Plan::Run(n) => n,
                    Plan::BlockedOnOutput => {
                        return Ok(if handled { Step::Progress } else { Step::Blocked });
                    }
                    Plan::BlockedOnInput => {
                        let starved = self.starved_inputs();
                        if starved.iter().any(|&port| upstream_done[port]) {
                            debug!("[{}] Upstream done and drained", self.name);
                            self.finish();
                            return Ok(Step::Done);
                        }
                        return Ok(if handled { Step::Progress } else { Step::Blocked });
                    }
                }
            }
        };

        self.dispatch(noutput)
    }

    fn drain_inbox(&mut self) -> WorkResult<bool> {
        let mut handled = false;
        while let Ok(control) = self.inbox.try_recv() {
            handled = true;
            match control {
                Control::Message { port, msg } => {
                    trace!("[{}] Message on '{}'", self.name, port);
                    self.stats.messages_handled += 1;
                    self.block.handle_message(&port, msg, &mut self.outbox)?;
                }
                Control::Parameter { name, value } => {
                    match self.block.set_parameter(&name, &value) {
                        Ok(()) => {
                            debug!("[{}] Parameter '{}' set to {:?}", self.name, name, value);
                            self.refresh_descriptors();
                        }
                        Err(e) => warn!("[{}] Parameter '{}' rejected: {}", self.name, name, e),
                    }
                }
            }
        }
        self.dispatch_outbox();
        Ok(handled)
    }

    /// Re-read rate, history and output multiple after a parameter change
    fn refresh_descriptors(&mut self) {
        let rate = self.block.rate();
        match rate.validate(&self.name) {
            Ok(()) => self.rate = rate,
            Err(e) => warn!("[{}] Keeping previous rate: {}", self.name, e),
        }
        self.output_multiple = self.block.output_multiple().max(1);

        let history = self.block.history().max(1);
        if history != self.history {
            let mut applied = true;
            for reader in &mut self.readers {
                if let Err(e) = reader.set_history(history) {
                    warn!("[{}] Cannot change history to {}: {}", self.name, history, e);
                    applied = false;
                    break;
                }
            }
            if applied {
                debug!("[{}] History {} -> {}", self.name, self.history, history);
                self.history = history;
            } else {
                for reader in &mut self.readers {
                    if let Err(e) = reader.set_history(self.history) {
                        warn!(
                            "[{}] Cannot restore history {} on '{}': {}",
                            self.name,
                            self.history,
                            reader.buffer_name(),
                            e
                        );
                    }
                }
            }
        }
    }

    fn effective_multiple(&self) -> usize {
        self.rate.effective_output_multiple(self.output_multiple)
    }

    fn plan(&mut self) -> Plan {
        for (avail, reader) in self.available.iter_mut().zip(&self.readers) {
            *avail = reader.items_available();
        }
        let multiple = self.effective_multiple();

        let space = self.writers.iter().map(|w| w.space_available()).min();
        let noutput = match space {
            Some(space) => {
                let n = round_down(space, multiple);
                if n == 0 {
                    return Plan::BlockedOnOutput;
                }
                Some(n)
            }
            None => None,
        };

        if self.readers.is_empty() {
            return noutput.map_or(Plan::BlockedOnOutput, Plan::Run);
        }

        let n = match self.rate.ratio() {
            Some(_) => {
                let usable = self.available.iter().copied().min().unwrap_or(0);
                let from_input = self.rate.output_for_input(usable, multiple);
                noutput.map_or(from_input, |n| n.min(from_input))
            }
            None => self.general_output(noutput, multiple),
        };

        if n == 0 { Plan::BlockedOnInput } else { Plan::Run(n) }
    }

    /// Largest output count whose forecast fits the available input
    fn general_output(&mut self, noutput: Option<usize>, multiple: usize) -> usize {
        let mut n = noutput.unwrap_or_else(|| {
            let most = self.available.iter().copied().max().unwrap_or(0);
            let estimate = (most as f64 * self.rate.relative_rate()).ceil() as usize;
            round_down(estimate, multiple).max(multiple)
        });
        loop {
            if self.forecast_fits(n) {
                return n;
            }
            if n <= multiple {
                return 0;
            }
            n = round_down(n / 2, multiple).max(multiple);
        }
    }

    fn forecast_fits(&mut self, noutput: usize) -> bool {
        self.required.fill(0);
        self.block.forecast(noutput, &mut self.required);
        let lookbehind = self.history - 1;
        self.required
            .iter()
            .zip(&self.available)
            .all(|(&required, &avail)| required <= avail + lookbehind)
    }

    /// Inputs that cannot satisfy even one output multiple
    fn starved_inputs(&mut self) -> Vec<usize> {
        let multiple = self.effective_multiple();
        match self.rate.ratio() {
            Some(_) => {
                let need = self.rate.input_for_output(multiple).max(1);
                self.available
                    .iter()
                    .enumerate()
                    .filter(|&(_, &avail)| avail < need)
                    .map(|(port, _)| port)
                    .collect()
            }
            None => {
                self.forecast_fits(multiple);
                let lookbehind = self.history - 1;
                self.required
                    .iter()
                    .zip(&self.available)
                    .enumerate()
                    .filter(|&(_, (&required, &avail))| required > avail + lookbehind)
                    .map(|(port, _)| port)
                    .collect()
            }
        }
    }

    fn dispatch(&mut self, noutput: usize) -> WorkResult<Step> {
        let noutput = if self.writers.is_empty() { 0 } else { noutput };
        let explicit_counts;
        let result = {
            let _guard = self.watchdog.guard();
            let mut io = WorkIo {
                inputs: Inputs::new(&self.readers, &self.available),
                outputs: Outputs::new(&mut self.writers, noutput),
                messages: &mut self.outbox,
            };
            let result = self.block.work(&mut io);
            explicit_counts = (io.inputs.into_consumed(), io.outputs.into_produced());
            result
        };
        self.stats.work_calls += 1;
        let (mut consumed, mut produced) = explicit_counts;

        let status = match result {
            Ok(status) => status,
            Err(WorkError::Shutdown) => {
                info!("[{}] Shutdown requested by block", self.name);
                WorkStatus::Done
            }
            Err(e) => {
                self.dispatch_outbox();
                return Err(e);
            }
        };

        if let WorkStatus::Produced(n) = status {
            produced.fill(n);
            if self.rate.ratio().is_some() && consumed.iter().all(|&c| c == 0) {
                consumed.fill(self.rate.input_for_output(n));
            }
        }

        self.check_counts(&consumed, &produced, noutput)?;
        self.propagate_tags(&consumed);

        for (reader, &n) in self.readers.iter_mut().zip(&consumed) {
            reader.update_read_pointer(n);
        }
        for (writer, &n) in self.writers.iter_mut().zip(&produced) {
            writer.update_write_pointer(n);
        }
        let consumed_total: usize = consumed.iter().sum();
        let produced_total: usize = produced.iter().sum();
        self.stats.items_consumed += consumed_total as u64;
        self.stats.items_produced += produced_total as u64;
        trace!(
            "[{}] work: noutput={} consumed={:?} produced={:?}",
            self.name, noutput, consumed, produced
        );

        let had_messages = !self.outbox.is_empty();
        self.dispatch_outbox();

        if status == WorkStatus::Done {
            debug!("[{}] Block reported done", self.name);
            self.finish();
            return Ok(Step::Done);
        }

        if consumed_total > 0 || produced_total > 0 || had_messages {
            Ok(Step::Progress)
        } else {
            Ok(Step::Blocked)
        }
    }

    fn check_counts(&self, consumed: &[usize], produced: &[usize], noutput: usize) -> WorkResult {
        for (port, (&n, &avail)) in consumed.iter().zip(&self.available).enumerate() {
            if n > avail {
                return Err(WorkError::ContractViolation(format!(
                    "block '{}' consumed {} items on input {} with {} available",
                    self.name, n, port, avail
                )));
            }
        }
        for (port, &n) in produced.iter().enumerate() {
            if n > noutput {
                return Err(WorkError::ContractViolation(format!(
                    "block '{}' produced {} items on output {} with room for {}",
                    self.name, n, port, noutput
                )));
            }
        }
        Ok(())
    }

    /// Copy tags of the consumed input windows onto the outputs
    fn propagate_tags(&mut self, consumed: &[usize]) {
        if self.writers.is_empty() || self.propagation == TagPropagation::Dont {
            return;
        }
        for (port, (reader, &n)) in self.readers.iter().zip(consumed).enumerate() {
            if n == 0 {
                continue;
            }
            let start = reader.total_read();
            let tags = reader.tags_in_window(start, start + n as u64);
            for mut tag in tags {
                tag.offset = self.rate.propagate_offset(tag.offset);
                match self.propagation {
                    TagPropagation::AllToAll => {
                        for writer in &mut self.writers {
                            writer.add_item_tag(tag.clone());
                        }
                    }
                    TagPropagation::OneToOne => {
                        if let Some(writer) = self.writers.get_mut(port) {
                            writer.add_item_tag(tag);
                        }
                    }
                    TagPropagation::Dont => {}
                }
            }
        }
    }

    fn dispatch_outbox(&mut self) {
        for (port, msg) in self.outbox.drain() {
            let Some(subscribers) = self.subscribers.get(&port) else {
                trace!("[{}] No subscribers on '{}'", self.name, port);
                continue;
            };
            for subscriber in subscribers {
                let control = Control::Message {
                    port: subscriber.port.clone(),
                    msg: msg.clone(),
                };
                if subscriber.sender.send(control).is_ok() {
                    subscriber.notifier.notify();
                } else {
                    trace!(
                        "[{}] Subscriber '{}' already finished",
                        self.name, subscriber.block
                    );
                }
            }
        }
    }

    /// Mark the block finished: release downstream and upstream, call `stop()`.
    ///
    /// Idempotent.
    pub(crate) fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        for writer in &self.writers {
            writer.set_done(true);
        }
        for reader in &mut self.readers {
            reader.set_done();
        }
        self.dispatch_outbox();
        if let Err(e) = self.block.stop() {
            warn!("[{}] stop() failed: {}", self.name, e);
        }
        if self.has_stream_ports() {
            self.stream_active.fetch_sub(1, Ordering::AcqRel);
        }
        info!(
            "[{}] Finished after {} work calls, {} items in, {} items out",
            self.name, self.stats.work_calls, self.stats.items_consumed, self.stats.items_produced
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::{AddConst, KeepOneInN, MovingSum};
    use crate::runtime::buffer::{Buffer, make_buffer};
    use crate::runtime::ports::{IoSignature, Item};
    use crate::runtime::reader::BufferReader;
    use crate::runtime::tracker::{AllocationTracker, Resource};
    use crate::runtime::watchdog::Watchdog;
    use crossbeam_channel::unbounded;
    use std::time::Duration;

    struct Harness<T: Item> {
        executor: BlockExecutor,
        control: Sender<Control>,
        upstream: Buffer<T>,
        output: BufferReader<T>,
    }

    /// One-in one-out block between a hand-driven upstream buffer and an
    /// output reader
    fn harness<T: Item>(block: impl Block + 'static) -> Harness<T> {
        let upstream = make_buffer::<T>(64).unwrap();
        let reserve = block.max_history().max(block.history());
        let reader = upstream.add_reader_with_reserve(block.history(), reserve).unwrap();
        let out = make_buffer::<T>(64).unwrap();
        let output = out.add_reader(1).unwrap();
        let (control, inbox) = unbounded();
        let watchdog = Watchdog::new(Duration::from_secs(1));

        let executor = BlockExecutor::new(ExecutorParts {
            id: BlockId::new(0),
            name: block.name().to_string(),
            block: Box::new(block),
            readers: vec![Box::new(reader)],
            writers: vec![Box::new(out)],
            inbox,
            subscribers: HashMap::new(),
            stream_active: Arc::new(AtomicUsize::new(1)),
            watchdog: watchdog.register_block("under_test"),
            guard: AllocationTracker::new().acquire(Resource::Block),
        });
        Harness {
            executor,
            control,
            upstream,
            output,
        }
    }

    impl<T: Item> Harness<T> {
        fn push(&mut self, items: &[T]) {
            self.upstream.write_window(items.len()).copy_from_slice(items);
            self.upstream.update_write_pointer(items.len());
        }

        fn take(&mut self) -> Vec<T> {
            let n = self.output.items_available();
            let items = self.output.read_window(n).to_vec();
            self.output.update_read_pointer(n);
            items
        }
    }

    #[test]
    fn test_sync_block_and_parameter_change() {
        let mut h = harness::<i32>(AddConst::new(10i32));
        assert_eq!(h.executor.run_one().unwrap(), Step::Blocked);

        h.push(&[1, 2, 3]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Progress);
        assert_eq!(h.take(), vec![11, 12, 13]);

        h.control
            .send(Control::Parameter {
                name: "constant".to_string(),
                value: Pmt::Long(100),
            })
            .unwrap();
        // Rejected parameters are logged and ignored
        h.control
            .send(Control::Parameter {
                name: "gain".to_string(),
                value: Pmt::Long(1),
            })
            .unwrap();
        h.push(&[4]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Progress);
        assert_eq!(h.take(), vec![104]);
        assert_eq!(h.executor.stats().work_calls, 2);
        assert_eq!(h.executor.stats().items_consumed, 4);
    }

    #[test]
    fn test_decimator_waits_for_whole_groups() {
        let mut h = harness::<u8>(KeepOneInN::<u8>::new(4).unwrap());
        h.push(&[1, 2, 3]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Blocked);

        h.push(&[4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Progress);
        assert_eq!(h.take(), vec![1, 5]);

        // Two leftovers and a finished upstream: nothing more can come
        h.upstream.set_done(true);
        assert_eq!(h.executor.run_one().unwrap(), Step::Done);
        assert!(h.executor.is_done());
        assert!(h.output.writer_done());
    }

    #[test]
    fn test_downstream_done_finishes_block() {
        let mut h = harness::<i32>(AddConst::new(0i32));
        h.push(&[1]);
        h.output.set_done();
        assert_eq!(h.executor.run_one().unwrap(), Step::Done);
        // Finishing releases the upstream writer
        assert!(h.upstream.all_readers_done());
    }

    #[test]
    fn test_history_change_within_reserve() {
        let mut h = harness::<i32>(MovingSum::<i32>::new(2, 4).unwrap());
        h.push(&[1, 1, 1, 1]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Progress);
        assert_eq!(h.take(), vec![1, 2, 2, 2]);

        h.control
            .send(Control::Parameter {
                name: "length".to_string(),
                value: Pmt::Long(4),
            })
            .unwrap();
        h.push(&[1, 1]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Progress);
        assert_eq!(h.take(), vec![4, 4]);
    }

    /// Moving sum that accepts any history, even past what its readers reserve
    struct Overreach {
        history: usize,
    }

    impl Block for Overreach {
        fn name(&self) -> &str {
            "overreach"
        }

        fn input_signature(&self) -> IoSignature {
            IoSignature::single::<i32>()
        }

        fn output_signature(&self) -> IoSignature {
            IoSignature::single::<i32>()
        }

        fn history(&self) -> usize {
            self.history
        }

        fn max_history(&self) -> usize {
            2
        }

        fn set_parameter(&mut self, _name: &str, value: &Pmt) -> WorkResult {
            self.history = value.as_u64().unwrap_or(1) as usize;
            Ok(())
        }

        fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
            let n = io.outputs.noutput_items();
            let length = io.inputs.history(0);
            let input = io.inputs.slice::<i32>(0)?;
            let out = io.outputs.slice_mut::<i32>(0)?;
            for (o, window) in out.iter_mut().zip(input.windows(length)) {
                *o = window.iter().sum();
            }
            Ok(WorkStatus::Produced(n))
        }
    }

    #[test]
    fn test_history_above_reserve_keeps_previous() {
        let mut h = harness::<i32>(Overreach { history: 2 });
        h.push(&[1, 1, 1]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Progress);
        assert_eq!(h.take(), vec![1, 2, 2]);

        h.control
            .send(Control::Parameter {
                name: "history".to_string(),
                value: Pmt::Long(5),
            })
            .unwrap();
        h.push(&[1, 1]);
        assert_eq!(h.executor.run_one().unwrap(), Step::Progress);
        assert_eq!(h.executor.history, 2);
        assert_eq!(h.executor.readers[0].history(), 2);
        assert_eq!(h.take(), vec![2, 2]);
    }

    /// Claims to have consumed more than it was offered
    struct Greedy;

    impl Block for Greedy {
        fn name(&self) -> &str {
            "greedy"
        }

        fn input_signature(&self) -> IoSignature {
            IoSignature::single::<i32>()
        }

        fn output_signature(&self) -> IoSignature {
            IoSignature::single::<i32>()
        }

        fn work(&mut self, io: &mut WorkIo) -> WorkResult<WorkStatus> {
            let n = io.inputs.ninput_items(0);
            io.inputs.consume(0, n + 1);
            Ok(WorkStatus::Ok)
        }
    }

    #[test]
    fn test_contract_violation_is_an_error() {
        let mut h = harness::<i32>(Greedy);
        h.push(&[1, 2]);
        assert!(matches!(
            h.executor.run_one(),
            Err(WorkError::ContractViolation(_))
        ));
        // Nothing was applied
        assert_eq!(h.upstream.space_available(), 62);
    }

    /// Message-only block used to check termination
    struct Listener;

    impl Block for Listener {
        fn name(&self) -> &str {
            "listener"
        }

        fn message_inputs(&self) -> Vec<Symbol> {
            vec![Symbol::new("in")]
        }
    }

    #[test]
    fn test_message_block_ends_with_stream_blocks() {
        let (control, inbox) = unbounded();
        let stream_active = Arc::new(AtomicUsize::new(1));
        let mut executor = BlockExecutor::new(ExecutorParts {
            id: BlockId::new(1),
            name: "listener".to_string(),
            block: Box::new(Listener),
            readers: Vec::new(),
            writers: Vec::new(),
            inbox,
            subscribers: HashMap::new(),
            stream_active: Arc::clone(&stream_active),
            watchdog: Watchdog::new(Duration::from_secs(1)).register_block("listener"),
            guard: AllocationTracker::new().acquire(Resource::Block),
        });

        assert_eq!(executor.run_one().unwrap(), Step::Blocked);
        control
            .send(Control::Message {
                port: Symbol::new("in"),
                msg: Pmt::Null,
            })
            .unwrap();
        assert_eq!(executor.run_one().unwrap(), Step::Progress);
        assert_eq!(executor.stats().messages_handled, 1);

        stream_active.store(0, Ordering::Release);
        assert_eq!(executor.run_one().unwrap(), Step::Done);
        // Message-only blocks do not count as stream blocks
        assert_eq!(stream_active.load(Ordering::Acquire), 0);
    }
}
