// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-key request state machine.
//!
//! A key is `Idle` until [`InFlightTable::begin`] makes it `Pending`. The
//! first caller becomes the [`Begin::Leader`] and is responsible for running
//! the request; everyone arriving while the key is pending is a
//! [`Begin::Follower`]. [`InFlightTable::settle`] publishes one outcome to all
//! of them and returns the key to `Idle`, so the next `begin` starts over.
//!
//! The table itself is synchronous and owns no tasks. Only
//! [`Waiter::wait`] needs a runtime.

use normcache_core::RequestKey;
use rustc_hash::FxHashMap;
use tokio::sync::watch;

use crate::error::FetchError;

/// Settled result of one keyed fetch, shared by every waiter.
pub type FetchOutcome = Result<RequestKey, FetchError>;

/// Observable state of one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Nothing in flight.
    Idle,
    /// A request is running; new callers join it.
    Pending,
}

/// Role handed out by [`InFlightTable::begin`].
#[derive(Debug)]
pub enum Begin {
    /// The key was idle: run the request, then settle.
    Leader(Waiter),
    /// The key was already pending: just wait.
    Follower(Waiter),
}

impl Begin {
    /// The waiter, whatever the role.
    pub fn into_waiter(self) -> Waiter {
        match self {
            Self::Leader(waiter) | Self::Follower(waiter) => waiter,
        }
    }

    /// `true` for [`Begin::Leader`].
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader(_))
    }
}

/// Receives the outcome of one pending key.
#[derive(Debug)]
pub struct Waiter {
    rx: watch::Receiver<Option<FetchOutcome>>,
}

impl Waiter {
    /// The outcome, if already settled.
    pub fn try_outcome(&self) -> Option<FetchOutcome> {
        self.rx.borrow().clone()
    }

    /// Wait for settlement.
    ///
    /// # Errors
    ///
    /// The shared [`FetchError`], or [`FetchError::Abandoned`] if the table
    /// entry vanished without an outcome.
    pub async fn wait(mut self) -> FetchOutcome {
        if let Some(outcome) = self.try_outcome() {
            return outcome;
        }
        let settled = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map(|outcome| outcome.clone());
        match settled {
            Ok(Some(outcome)) => outcome,
            Ok(None) | Err(_) => Err(FetchError::Abandoned),
        }
    }
}

/// Pending keys and their outcome channels.
#[derive(Debug, Default)]
pub struct InFlightTable {
    pending: FxHashMap<RequestKey, watch::Sender<Option<FetchOutcome>>>,
}

impl InFlightTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Join or start the request for `key`.
    pub fn begin(&mut self, key: &RequestKey) -> Begin {
        if let Some(tx) = self.pending.get(key) {
            return Begin::Follower(Waiter { rx: tx.subscribe() });
        }
        let (tx, rx) = watch::channel(None);
        self.pending.insert(key.clone(), tx);
        Begin::Leader(Waiter { rx })
    }

    /// Publish `outcome` to every waiter on `key` and return it to idle.
    ///
    /// Returns `false` if `key` was not pending.
    pub fn settle(&mut self, key: &RequestKey, outcome: FetchOutcome) -> bool {
        self.pending
            .remove(key)
            .map(|tx| tx.send_replace(Some(outcome)))
            .is_some()
    }

    /// Current state of `key`.
    pub fn state(&self, key: &RequestKey) -> KeyState {
        if self.pending.contains_key(key) {
            KeyState::Pending
        } else {
            KeyState::Idle
        }
    }

    /// Number of pending keys.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// `true` when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
