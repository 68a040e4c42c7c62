//! Shadow document: per-session state paired 1:1 with a host document.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use uuid::Uuid;

use crate::client::ChangeClient;
use crate::queue::{ActionQueue, CycleOutcome};
use crate::realised::RealisedChangeTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub name: String,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone)]
pub struct Users {
    current: User,
}

impl Users {
    pub fn current_user(&self) -> &User {
        &self.current
    }
}

/// Called each time the queue drains to empty.
pub type CompletionHook = Arc<dyn Fn(&ShadowDocument) + Send + Sync>;

pub struct ShadowDocument {
    id: Uuid,
    users: Users,
    queue: ActionQueue,
    realised: Mutex<RealisedChangeTable>,
    busy: AtomicBool,
    client: Mutex<Option<Arc<ChangeClient>>>,
    disposed: AtomicBool,
    completed_queues: AtomicU64,
    on_completed: Mutex<Option<CompletionHook>>,
}

impl ShadowDocument {
    pub fn new(current_user: User) -> Self {
        Self {
            id: Uuid::new_v4(),
            users: Users { current: current_user },
            queue: ActionQueue::new(),
            realised: Mutex::new(RealisedChangeTable::new()),
            busy: AtomicBool::new(false),
            client: Mutex::new(None),
            disposed: AtomicBool::new(false),
            completed_queues: AtomicU64::new(0),
            on_completed: Mutex::new(None),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn users(&self) -> &Users {
        &self.users
    }

    /// Name of the user driving this session.
    pub fn user_name(&self) -> &str {
        &self.users.current.name
    }

    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    pub fn realised(&self) -> MutexGuard<'_, RealisedChangeTable> {
        self.realised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one queued action; fires the completion hook when the queue drains.
    pub fn run_next_action(&self) -> CycleOutcome {
        let outcome = self.queue.run_next_action(self);
        if outcome == CycleOutcome::Completed {
            self.queue_completed();
        }
        outcome
    }

    pub fn force_cycle_queue(&self) -> usize {
        let ran = self.queue.force_cycle_queue(self);
        if ran > 0 {
            self.queue_completed();
        }
        ran
    }

    /// Install the hook run after every queue completion.
    pub fn on_queue_completed(&self, hook: impl Fn(&ShadowDocument) + Send + Sync + 'static) {
        let hook: CompletionHook = Arc::new(hook);
        *self.hook_slot() = Some(hook);
    }

    fn hook_slot(&self) -> MutexGuard<'_, Option<CompletionHook>> {
        self.on_completed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn queue_completed(&self) {
        self.completed_queues.fetch_add(1, Ordering::Relaxed);
        // Cloned out so the hook runs without the slot locked.
        let hook = self.hook_slot().clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    /// Times the queue has drained to empty.
    pub fn completed_queues(&self) -> u64 {
        self.completed_queues.load(Ordering::Relaxed)
    }

    /// True while a received change is being applied to the host document.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Mark the document busy until the guard drops.
    pub fn busy_guard(&self) -> BusyGuard<'_> {
        let previous = self.busy.swap(true, Ordering::AcqRel);
        BusyGuard {
            flag: &self.busy,
            previous,
        }
    }

    fn client_slot(&self) -> MutexGuard<'_, Option<Arc<ChangeClient>>> {
        self.client.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach_client(&self, client: Arc<ChangeClient>) {
        *self.client_slot() = Some(client);
    }

    pub fn client(&self) -> Option<Arc<ChangeClient>> {
        self.client_slot().clone()
    }

    pub fn take_client(&self) -> Option<Arc<ChangeClient>> {
        self.client_slot().take()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release internal resources. The document accepts no work afterwards.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let dropped = self.queue.clear();
        if dropped > 0 {
            log::warn!("Dropped {dropped} pending actions disposing {}", self.id);
        }
        self.realised().clear();
        self.client_slot().take();
        self.hook_slot().take();
    }
}

impl std::fmt::Debug for ShadowDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowDocument")
            .field("id", &self.id)
            .field("user", &self.users.current.name)
            .field("pending", &self.queue.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

/// Restores the busy flag to its prior value on drop.
pub struct BusyGuard<'a> {
    flag: &'a AtomicBool,
    previous: bool,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.previous, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::IdleAction;
    use uuid::Uuid;

    #[test]
    fn test_current_user() {
        let doc = ShadowDocument::new(User::new("alice"));
        assert_eq!(doc.users().current_user().name, "alice");
        assert_eq!(doc.user_name(), "alice");
    }

    #[test]
    fn test_busy_guard_nests() {
        let doc = ShadowDocument::new(User::new("alice"));
        assert!(!doc.is_busy());
        {
            let _outer = doc.busy_guard();
            {
                let _inner = doc.busy_guard();
                assert!(doc.is_busy());
            }
            assert!(doc.is_busy());
        }
        assert!(!doc.is_busy());
    }

    #[test]
    fn test_completion_counter() {
        let doc = ShadowDocument::new(User::new("alice"));
        doc.queue().add_action(IdleAction::new("noop", |_| Ok(())));
        doc.queue().add_action(IdleAction::new("noop", |_| Ok(())));

        assert_eq!(doc.run_next_action(), CycleOutcome::Ran);
        assert_eq!(doc.completed_queues(), 0);
        assert_eq!(doc.run_next_action(), CycleOutcome::Completed);
        assert_eq!(doc.completed_queues(), 1);
    }

    #[test]
    fn test_completion_hook_runs_on_every_drain() {
        let doc = ShadowDocument::new(User::new("alice"));
        let seen = Arc::new(AtomicU64::new(0));
        let counter = seen.clone();
        doc.on_queue_completed(move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        doc.queue().add_action(IdleAction::new("noop", |_| Ok(())));
        doc.queue().add_action(IdleAction::new("noop", |_| Ok(())));
        assert_eq!(doc.force_cycle_queue(), 2);
        assert_eq!(seen.load(Ordering::Relaxed), 1);

        doc.queue().add_action(IdleAction::new("noop", |_| Ok(())));
        assert_eq!(doc.run_next_action(), CycleOutcome::Completed);
        assert_eq!(seen.load(Ordering::Relaxed), 2);

        // Nothing ran, nothing completed.
        doc.force_cycle_queue();
        assert_eq!(seen.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_dispose_clears_state() {
        let doc = ShadowDocument::new(User::new("alice"));
        doc.realised().add_pair(Uuid::new_v4(), Uuid::new_v4());
        doc.queue().add_action(IdleAction::new("noop", |_| Ok(())));

        doc.dispose();

        assert!(doc.is_disposed());
        assert!(doc.realised().is_empty());
        assert!(doc.queue().is_empty());
        // Idempotent.
        doc.dispose();
    }
}
