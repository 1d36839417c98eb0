//! Block trait for stream processing
//!
//! Defines the contract between a processing block and the runtime: IO
//! signatures, rate descriptor, lifecycle hooks, message and parameter
//! handlers, and the `work()` entry point called by the scheduler.

use super::errors::{WorkError, WorkResult};
use super::pmt::{Pmt, Symbol};
use super::ports::IoSignature;
use super::rate::Rate;
use super::work_io::{MessageOutbox, WorkIo};

/// How stream tags flow from a block's inputs to its outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagPropagation {
    /// Every input's tags go to every output
    #[default]
    AllToAll,
    /// Input `i` goes to output `i`
    OneToOne,
    /// Tags stop here; the block adds its own if needed
    Dont,
}

/// Outcome of one `work()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Counts were reported through `consume`/`produce`
    Ok,
    /// Shorthand for producing `n` items on every output. Exact-rate blocks
    /// that did not call `consume` also consume the matching input count on
    /// every input.
    Produced(usize),
    /// The block will never produce again
    Done,
}

/// A processing block driven by the scheduler
/// - Sources have no stream inputs
/// - Sinks have no stream outputs
/// - Message-only blocks have neither and only react to messages
pub trait Block: Send {
    /// Debug name; used as the default instance name in a flowgraph
    fn name(&self) -> &str;

    fn input_signature(&self) -> IoSignature {
        IoSignature::empty()
    }

    fn output_signature(&self) -> IoSignature {
        IoSignature::empty()
    }

    fn rate(&self) -> Rate {
        Rate::Sync
    }

    /// Items of look-behind needed, counting the current item
    fn history(&self) -> usize {
        1
    }

    /// Largest history this block may switch to at runtime
    fn max_history(&self) -> usize {
        self.history()
    }

    /// Output is produced in multiples of this many items
    fn output_multiple(&self) -> usize {
        1
    }

    fn tag_propagation(&self) -> TagPropagation {
        TagPropagation::AllToAll
    }

    /// Fill `required[i]` with the items input `i` needs to produce `noutput`
    /// items, including `history - 1` items of look-behind.
    fn forecast(&self, noutput: usize, required: &mut [usize]) {
        let n = self.rate().forecast(noutput, self.history());
        required.fill(n);
    }

    /// Accept or reject the connected port counts
    fn check_topology(&self, _ninputs: usize, _noutputs: usize) -> bool {
        true
    }

    fn message_inputs(&self) -> Vec<Symbol> {
        Vec::new()
    }

    fn message_outputs(&self) -> Vec<Symbol> {
        Vec::new()
    }

    /// Called once before any worker thread runs
    fn start(&mut self) -> WorkResult {
        Ok(())
    }

    /// Called once when the block finishes or the graph stops
    fn stop(&mut self) -> WorkResult {
        Ok(())
    }

    /// Handle a message arriving on one of [`Block::message_inputs`]
    fn handle_message(
        &mut self,
        _port: &Symbol,
        _msg: Pmt,
        _outbox: &mut MessageOutbox,
    ) -> WorkResult {
        Ok(())
    }

    /// Apply a runtime parameter change; never concurrent with `work()`
    fn set_parameter(&mut self, name: &str, _value: &Pmt) -> WorkResult {
        Err(WorkError::UnknownParameter(name.to_string()))
    }

    /// Process the offered input windows into the output windows.
    ///
    /// Blocks without stream ports are never asked to work.
    fn work(&mut self, _io: &mut WorkIo) -> WorkResult<WorkStatus> {
        Ok(WorkStatus::Done)
    }
}
