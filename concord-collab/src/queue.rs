//! Single-threaded action queue.
//!
//! Every mutation of a host document, whether capturing a local edit or
//! applying a remote change, is pushed here and run on the host's idle cycle,
//! one action at a time, in enqueue order.
//!
//! ```text
//!        add_action            run_next_action
//!  Idle ────────────► Scheduled ──────────────► Draining
//!   ▲                    ▲                         │
//!   │     queue empty    │   actions remain        │
//!   └────────────────────┴─────────────────────────┘
//! ```
//!
//! Only one action runs at a time. A second thread that wants to run the
//! queue while another thread is draining waits for that action to finish;
//! only a call made from inside the running action itself is refused.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use concord_core::Change;

use crate::error::SyncError;
use crate::registry::SharedHost;
use crate::shadow::ShadowDocument;

type ActionFn = Box<dyn FnOnce(&ShadowDocument) -> Result<(), SyncError> + Send>;

/// Argument bundle for actions that apply a received change.
pub struct IdleArgs {
    pub host: SharedHost,
    pub change: Change,
}

/// A unit of deferred work.
pub struct IdleAction {
    name: &'static str,
    run: ActionFn,
}

impl IdleAction {
    pub fn new<F>(name: &'static str, run: F) -> Self
    where
        F: FnOnce(&ShadowDocument) -> Result<(), SyncError> + Send + 'static,
    {
        Self {
            name,
            run: Box::new(run),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Debug for IdleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleAction").field("name", &self.name).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing pending; not hooked into the idle cycle.
    Idle,
    /// At least one action pending.
    Scheduled,
    /// An action is executing.
    Draining,
}

/// Result of one idle-cycle step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was pending.
    Empty,
    /// One action ran and more remain.
    Ran,
    /// One action ran and the queue is now empty.
    Completed,
    /// Called from inside a running action; nothing ran.
    Busy,
}

struct QueueInner {
    actions: VecDeque<IdleAction>,
    state: QueueState,
    drainer: Option<ThreadId>,
}

pub struct ActionQueue {
    inner: Mutex<QueueInner>,
    /// Signalled whenever an action finishes.
    finished: Condvar,
    executed: AtomicU64,
}

/// Leaves `Draining` when dropped, even if the action panicked.
struct DrainGuard<'a> {
    queue: &'a ActionQueue,
    outcome: Option<CycleOutcome>,
}

impl DrainGuard<'_> {
    fn finish(mut self) -> CycleOutcome {
        let outcome = self.release();
        self.outcome = Some(outcome);
        outcome
    }

    fn release(&self) -> CycleOutcome {
        let mut inner = self.queue.lock();
        inner.drainer = None;
        let outcome = if inner.actions.is_empty() {
            inner.state = QueueState::Idle;
            CycleOutcome::Completed
        } else {
            inner.state = QueueState::Scheduled;
            CycleOutcome::Ran
        };
        drop(inner);
        self.queue.finished.notify_all();
        outcome
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.release();
        }
    }
}

impl ActionQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                actions: VecDeque::new(),
                state: QueueState::Idle,
                drainer: None,
            }),
            finished: Condvar::new(),
            executed: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an action. Returns true if this scheduled a previously idle queue.
    pub fn add_action(&self, action: IdleAction) -> bool {
        let mut inner = self.lock();
        inner.actions.push_back(action);
        if inner.state == QueueState::Idle {
            inner.state = QueueState::Scheduled;
            return true;
        }
        false
    }

    /// Pop and run exactly one action on the calling thread.
    ///
    /// Waits if another thread is running an action. Returns `Busy` only when
    /// called from inside an action running on this thread.
    ///
    /// Action failures are logged and swallowed; a dropped change is less
    /// harmful than a stalled queue.
    pub fn run_next_action(&self, doc: &ShadowDocument) -> CycleOutcome {
        let me = thread::current().id();
        let action = {
            let mut inner = self.lock();
            while inner.state == QueueState::Draining {
                if inner.drainer == Some(me) {
                    return CycleOutcome::Busy;
                }
                inner = self
                    .finished
                    .wait(inner)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            match inner.actions.pop_front() {
                Some(action) => {
                    inner.state = QueueState::Draining;
                    inner.drainer = Some(me);
                    action
                }
                None => {
                    inner.state = QueueState::Idle;
                    return CycleOutcome::Empty;
                }
            }
        };

        let guard = DrainGuard {
            queue: self,
            outcome: None,
        };
        let name = action.name;
        if let Err(e) = (action.run)(doc) {
            log::warn!("Idle action {name} failed on document {}: {e}", doc.id());
        }
        self.executed.fetch_add(1, Ordering::Relaxed);
        guard.finish()
    }

    /// Run every pending action now, bypassing the idle cycle.
    ///
    /// Returns the number of actions run by this call. Actions enqueued while
    /// draining are run too, and an action running on another thread is
    /// waited for rather than skipped. From inside a running action this
    /// returns 0 without running anything.
    pub fn force_cycle_queue(&self, doc: &ShadowDocument) -> usize {
        let mut ran = 0;
        loop {
            match self.run_next_action(doc) {
                CycleOutcome::Ran => ran += 1,
                CycleOutcome::Completed => return ran + 1,
                CycleOutcome::Empty | CycleOutcome::Busy => return ran,
            }
        }
    }

    pub fn state(&self) -> QueueState {
        self.lock().state
    }

    pub fn len(&self) -> usize {
        self.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().actions.is_empty()
    }

    /// Drop pending actions without running them.
    pub fn clear(&self) -> usize {
        let mut inner = self.lock();
        let dropped = inner.actions.len();
        inner.actions.clear();
        if inner.state == QueueState::Scheduled {
            inner.state = QueueState::Idle;
        }
        dropped
    }

    /// Total actions executed since creation.
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

impl Default for ActionQueue {
    fn default() -> Self {
        Self::new()
    }
}
