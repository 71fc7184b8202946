use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct MailboxState {
    pending: HashMap<i64, VecDeque<String>>,
    leases: HashSet<i64>,
}

/// Per-user single-consumer mailboxes for out-of-band replies, plus a
/// per-user task lease so two concurrent commands from the same user cannot
/// race on the same mailbox and transcript. Owned by the composition root
/// and passed by reference; never ambient global state.
#[derive(Debug, Default)]
pub struct ReplyMailboxes {
    state: Mutex<MailboxState>,
    arrived: Condvar,
}

impl ReplyMailboxes {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Append a reply to the user's mailbox, creating it on first use.
    /// Never blocks.
    pub fn enqueue(&self, user_id: i64, text: impl Into<String>) {
        let mut state = self.lock();
        state.pending.entry(user_id).or_default().push_back(text.into());
        self.arrived.notify_all();
    }

    /// Wait for the user's next reply or the timeout, whichever comes first.
    /// A timeout does not discard a later-arriving reply; it stays queued for
    /// the next call, and each reply is consumed at most once.
    pub fn await_reply(&self, user_id: i64, timeout: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(reply) = state
                .pending
                .get_mut(&user_id)
                .and_then(VecDeque::pop_front)
            {
                return Some(reply);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.arrived.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Claim the user's exclusive task slot. Returns `None` while another
    /// task for the same user is still running.
    pub fn try_lease(self: &Arc<Self>, user_id: i64) -> Option<TaskLease> {
        let mut state = self.lock();
        if !state.leases.insert(user_id) {
            return None;
        }
        Some(TaskLease {
            registry: Arc::clone(self),
            user_id,
        })
    }
}

#[derive(Debug)]
pub struct TaskLease {
    registry: Arc<ReplyMailboxes>,
    user_id: i64,
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        let mut state = self.registry.lock();
        state.leases.remove(&self.user_id);
    }
}
