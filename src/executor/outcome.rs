// Per-host outcomes and the single-assignment slot that holds them

use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;

use super::task::WorkItem;

/// The final result recorded for a work item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// Command ran; `text` is its captured output
    Success { text: String },
    /// Host could not be reached, or the command could not be run on it
    ConnectionFailure { host: String, message: String },
    /// Deadline passed before the task returned; the task was abandoned
    Timeout { host: String },
}

impl Outcome {
    pub fn success(text: impl Into<String>) -> Self {
        Outcome::Success { text: text.into() }
    }

    pub fn failure(item: &WorkItem, message: impl Into<String>) -> Self {
        Outcome::ConnectionFailure {
            host: item.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(item: &WorkItem) -> Self {
        Outcome::Timeout {
            host: item.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Outcome::Timeout { .. })
    }
}

/// Holds exactly one [`Outcome`] for one work item.
///
/// Both the worker and the deadline race to fill the slot. The first writer
/// wins; every later write is rejected, so an abandoned task can never
/// report a second, stale outcome.
#[derive(Debug, Default)]
pub struct OutcomeSlot {
    cell: OnceCell<Outcome>,
}

impl OutcomeSlot {
    pub fn new() -> Self {
        OutcomeSlot {
            cell: OnceCell::new(),
        }
    }

    /// Try to record `outcome`. Returns the rejected value if the slot was
    /// already filled.
    pub fn fill(&self, outcome: Outcome) -> Result<(), Outcome> {
        self.cell.try_insert(outcome).map(|_| ()).map_err(|(_, rejected)| rejected)
    }

    /// Record `outcome` unless the slot is filled, then return whichever
    /// outcome won.
    pub fn resolve(&self, outcome: Outcome) -> Outcome {
        match self.cell.try_insert(outcome) {
            Ok(winner) => winner.clone(),
            Err((winner, _)) => winner.clone(),
        }
    }

    pub fn get(&self) -> Option<&Outcome> {
        self.cell.get()
    }
}

/// One item's outcome as delivered to the dispatcher's caller
#[derive(Debug, Clone, Serialize)]
pub struct Completion {
    /// Position of the item in the input sequence
    pub index: usize,
    pub item: WorkItem,
    pub outcome: Outcome,
    /// Time from slot acquisition until the outcome was determined
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
