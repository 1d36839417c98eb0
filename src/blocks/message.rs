//! Message-only blocks

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::runtime::block::Block;
use crate::runtime::errors::WorkResult;
use crate::runtime::pmt::{Pmt, Symbol};
use crate::runtime::work_io::MessageOutbox;

/// Shared view of the messages a [`MessageDebug`] received
#[derive(Clone)]
pub struct MessageDebugHandle {
    messages: Arc<Mutex<Vec<Pmt>>>,
}

impl MessageDebugHandle {
    pub fn messages(&self) -> Vec<Pmt> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Logs and stores every message arriving on its `in` port
pub struct MessageDebug {
    name: String,
    messages: Arc<Mutex<Vec<Pmt>>>,
}

impl MessageDebug {
    pub fn new() -> Self {
        Self {
            name: "message_debug".to_string(),
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn handle(&self) -> MessageDebugHandle {
        MessageDebugHandle {
            messages: Arc::clone(&self.messages),
        }
    }
}

impl Default for MessageDebug {
    fn default() -> Self {
        Self::new()
    }
}

impl Block for MessageDebug {
    fn name(&self) -> &str {
        &self.name
    }

    fn message_inputs(&self) -> Vec<Symbol> {
        vec![Symbol::new("in")]
    }

    fn handle_message(&mut self, port: &Symbol, msg: Pmt, _outbox: &mut MessageOutbox) -> WorkResult {
        info!("[{}] {}: {:?}", self.name, port, msg);
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(msg);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stores_messages_in_order() {
        let mut block = MessageDebug::new().with_name("dbg");
        let handle = block.handle();
        let mut outbox = MessageOutbox::new();
        let port = Symbol::new("in");

        block.handle_message(&port, Pmt::Long(1), &mut outbox).unwrap();
        block.handle_message(&port, "two".into(), &mut outbox).unwrap();

        assert_eq!(handle.len(), 2);
        assert_eq!(handle.messages()[0], Pmt::Long(1));
        assert!(outbox.is_empty());
        assert_eq!(block.message_inputs(), vec![Symbol::new("in")]);
    }
}
