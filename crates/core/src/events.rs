use std::sync::mpsc;

use chrono::{DateTime, Utc};

use crate::logger;
use crate::recorder::TradeLedgerEntry;

/// Structured debug line with timing details.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugRecord {
    pub timestamp: DateTime<Utc>,
    /// FSM state name when the record was made.
    pub state: &'static str,
    pub message: String,
    pub extra: Vec<(&'static str, String)>,
}

/// Engine → controller notifications. Order on the channel is emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Status(String),
    Debug(String),
    DebugRecord(DebugRecord),
    TradeLogged(TradeLedgerEntry),
    BalanceChanged(f64),
    PersistenceFailed(String),
    Fatal(String),
    /// Last event of every run.
    Finished,
}

/// Sending half used by the engine thread. A dropped receiver is not an
/// error; the run just goes unobserved.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<EngineEvent>,
}

impl Emitter {
    pub fn new(tx: mpsc::Sender<EngineEvent>) -> Self {
        Self { tx }
    }

    pub fn send(&self, event: EngineEvent) {
        self.tx.send(event).ok();
    }

    pub fn status(&self, status: impl Into<String>) {
        let status = status.into();
        logger::info_p("engine", &status);
        self.send(EngineEvent::Status(status));
    }

    pub fn debug(&self, state: &'static str, message: impl Into<String>) {
        self.debug_with(state, message, Vec::new());
    }

    pub fn debug_with(
        &self,
        state: &'static str,
        message: impl Into<String>,
        extra: Vec<(&'static str, String)>,
    ) {
        let message = message.into();
        self.send(EngineEvent::Debug(message.clone()));
        self.send(EngineEvent::DebugRecord(DebugRecord {
            timestamp: Utc::now(),
            state,
            message,
            extra,
        }));
    }
}
