//! WorkItem domain entity
//!
//! One changed path travelling through the upload pipeline.
//!
//! ## State Machine
//!
//! ```text
//!   ┌─────────┐  pull   ┌──────────┐  accepted   ┌───────────┐
//!   │ Pending │ ──────► │ InFlight │ ──────────► │ Succeeded │
//!   └─────────┘         └──────────┘             └───────────┘
//!        ▲                │      │
//!        │ timer fires    │      │ fatal / exhausted
//!        │                ▼      ▼
//!   ┌──────────┐ ◄────────┘   ┌──────────┐
//!   │ Retrying │ ───────────► │ Rejected │
//!   └──────────┘  no capacity └──────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::headers::{HeaderResolver, HeaderSet};
use super::newtypes::RelPath;

/// Upload state of a work item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Queued, waiting for a worker
    #[default]
    Pending,
    /// A worker is transferring it
    InFlight,
    /// Waiting on a backoff timer before re-entering the queue
    Retrying,
    /// Accepted by the store
    Succeeded,
    /// Failed permanently
    Rejected,
}

impl ItemState {
    /// Returns true for states an item never leaves
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Succeeded | ItemState::Rejected)
    }

    /// Returns the name of this state variant
    pub fn name(&self) -> &'static str {
        match self {
            ItemState::Pending => "Pending",
            ItemState::InFlight => "InFlight",
            ItemState::Retrying => "Retrying",
            ItemState::Succeeded => "Succeeded",
            ItemState::Rejected => "Rejected",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single path to upload, with its retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    path: RelPath,
    attempts: u32,
    headers: Option<HeaderSet>,
    state: ItemState,
    last_error: Option<String>,
}

impl WorkItem {
    /// Creates a pending item with no failed attempts
    pub fn new(path: RelPath) -> Self {
        Self {
            path,
            attempts: 0,
            headers: None,
            state: ItemState::Pending,
            last_error: None,
        }
    }

    pub fn path(&self) -> &RelPath {
        &self.path
    }

    /// Number of failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Headers for this item, resolved on first use and then cached
    pub fn resolve_headers(&mut self, resolver: &HeaderResolver) -> &HeaderSet {
        let path = &self.path;
        self.headers
            .get_or_insert_with(|| resolver.resolve(path.as_str()))
    }

    /// Count a failed try and remember why it failed; returns the new count
    pub fn record_attempt(&mut self, error: impl Into<String>) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.attempts
    }

    /// Checks if a transition to the target state is valid
    pub fn can_transition_to(&self, target: ItemState) -> bool {
        matches!(
            (self.state, target),
            (ItemState::Pending, ItemState::InFlight)
                | (ItemState::InFlight, ItemState::Succeeded)
                | (ItemState::InFlight, ItemState::Retrying)
                | (ItemState::InFlight, ItemState::Rejected)
                | (ItemState::Retrying, ItemState::Pending)
                | (ItemState::Retrying, ItemState::Rejected)
        )
    }

    /// Transitions to a new state
    ///
    /// # Errors
    /// Returns [`DomainError::InvalidState`] if the transition is not allowed
    pub fn transition_to(&mut self, target: ItemState) -> Result<(), DomainError> {
        if !self.can_transition_to(target) {
            return Err(DomainError::InvalidState {
                from: self.state.name().to_string(),
                to: target.name().to_string(),
            });
        }
        self.state = target;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::InFlight)
    }

    pub fn succeed(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Succeeded)
    }

    pub fn schedule_retry(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Retrying)
    }

    pub fn requeue(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Pending)
    }

    pub fn reject(&mut self) -> Result<(), DomainError> {
        self.transition_to(ItemState::Rejected)
    }
}
