//! Scripted transport for tests
//!
//! Lets unit and integration tests drive the full channel/registry/engine
//! stack without a live bridge. Enabled for this crate's own tests and for
//! downstream crates via the `test-helpers` feature.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use droidherd_core::prelude::*;

use crate::commands::BridgeCommand;
use crate::transport::{BridgeTransport, CommandOutput};

type Responder = dyn Fn(&str, &BridgeCommand) -> Result<CommandOutput> + Send + Sync;

/// Transport that records every command and answers from a closure.
pub struct ScriptedTransport {
    log: Mutex<Vec<(String, BridgeCommand)>>,
    respond: Box<Responder>,
}

impl ScriptedTransport {
    pub fn new(
        respond: impl Fn(&str, &BridgeCommand) -> Result<CommandOutput> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            log: Mutex::new(Vec::new()),
            respond: Box::new(respond),
        })
    }

    /// Transport that acknowledges everything with empty output.
    pub fn always_ok() -> Arc<Self> {
        Self::new(|_, _| Ok(CommandOutput::ok_text("")))
    }

    /// Every command seen so far, with the serial it was addressed to.
    pub fn commands(&self) -> Vec<(String, BridgeCommand)> {
        self.log.lock().unwrap().clone()
    }

    /// Commands addressed to one serial.
    pub fn commands_for(&self, serial: &str) -> Vec<BridgeCommand> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, _)| s == serial)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// Count of commands matching a predicate.
    pub fn count_matching(&self, predicate: impl Fn(&BridgeCommand) -> bool) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, c)| predicate(c))
            .count()
    }
}

#[async_trait]
impl BridgeTransport for ScriptedTransport {
    async fn run(&self, serial: &str, command: &BridgeCommand) -> Result<CommandOutput> {
        self.log
            .lock()
            .unwrap()
            .push((serial.to_string(), command.clone()));
        (self.respond)(serial, command)
    }
}
