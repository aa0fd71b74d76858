//! Single-flight access token refresh.
//!
//! At most one refresh call is in flight. Requests that hit a 401 while it
//! runs are parked as waiters and all receive the same outcome.

use super::error::ApiError;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

pub(crate) type RefreshOutcome = Result<String, ApiError>;

enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

pub(crate) enum Join {
    /// The caller must start the refresh; its own receiver is already queued.
    Lead(oneshot::Receiver<RefreshOutcome>),
    /// A refresh is already running.
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// The stored token already differs from the rejected one.
    Fresh(String),
}

pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
        }
    }

    fn state(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state(), RefreshState::Refreshing { .. })
    }

    pub fn pending(&self) -> usize {
        match &*self.state() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { waiters } => waiters.len(),
        }
    }

    /// Checks and sets the state in one critical section; never awaits.
    pub(crate) fn join(&self, sent_with: Option<&str>, stored: Option<String>) -> Join {
        let mut state = self.state();
        if let RefreshState::Refreshing { waiters } = &mut *state {
            let (tx, rx) = oneshot::channel();
            waiters.push(tx);
            return Join::Wait(rx);
        }

        if let Some(current) = stored {
            if sent_with != Some(current.as_str()) {
                return Join::Fresh(current);
            }
        }
        let (tx, rx) = oneshot::channel();
        *state = RefreshState::Refreshing { waiters: vec![tx] };
        Join::Lead(rx)
    }

    /// Returns to `Idle` and hands `outcome` to every waiter, in queue order.
    pub(crate) fn complete(&self, outcome: RefreshOutcome) -> usize {
        let previous = std::mem::replace(&mut *self.state(), RefreshState::Idle);
        let RefreshState::Refreshing { waiters } = previous else {
            return 0;
        };

        let count = waiters.len();
        for waiter in waiters {
            // A waiter whose caller gave up is simply skipped.
            let _ = waiter.send(outcome.clone());
        }
        count
    }
}

/// Held by the task running a refresh. If the task ends without calling
/// [`RefreshLease::finish`], including by panicking, every waiter gets
/// `SessionExpired` and the coordinator returns to `Idle`.
pub(crate) struct RefreshLease {
    coordinator: Arc<RefreshCoordinator>,
    settled: bool,
}

impl RefreshLease {
    pub(crate) fn new(coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            coordinator,
            settled: false,
        }
    }

    pub(crate) fn finish(mut self, outcome: RefreshOutcome) -> usize {
        self.settled = true;
        self.coordinator.complete(outcome)
    }
}

impl Drop for RefreshLease {
    fn drop(&mut self) {
        if !self.settled {
            let drained = self.coordinator.complete(Err(ApiError::SessionExpired));
            tracing::warn!(drained, "token refresh abandoned");
        }
    }
}
