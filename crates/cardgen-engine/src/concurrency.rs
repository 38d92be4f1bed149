use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use cardgen_contracts::models::ProviderKind;

const PROVIDER_COUNT: usize = ProviderKind::ALL.len();

#[derive(Debug, Default)]
struct SlotCounters {
    in_flight: [usize; PROVIDER_COUNT],
    peak: [usize; PROVIDER_COUNT],
}

/// Per-provider in-flight counters shared by every worker of a processor.
///
/// A worker blocks on the condition variable until its own provider has a
/// free slot; it never borrows a slot from the other provider. Slots are
/// released when the guard drops, so unwinding releases them too.
#[derive(Debug, Clone, Default)]
pub struct ProviderSlots {
    inner: Arc<(Mutex<SlotCounters>, Condvar)>,
}

impl ProviderSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, provider: ProviderKind, cap: usize) -> SlotGuard {
        let cap = cap.max(1);
        let idx = provider.index();
        let (lock, cvar) = &*self.inner;
        let mut counters = lock_counters(lock);
        while counters.in_flight[idx] >= cap {
            counters = cvar
                .wait(counters)
                .unwrap_or_else(PoisonError::into_inner);
        }
        counters.in_flight[idx] += 1;
        counters.peak[idx] = counters.peak[idx].max(counters.in_flight[idx]);
        SlotGuard {
            slots: self.clone(),
            idx,
        }
    }

    pub fn in_flight(&self, provider: ProviderKind) -> usize {
        lock_counters(&self.inner.0).in_flight[provider.index()]
    }

    /// Highest simultaneous in-flight count seen for `provider`.
    pub fn peak(&self, provider: ProviderKind) -> usize {
        lock_counters(&self.inner.0).peak[provider.index()]
    }

    fn release(&self, idx: usize) {
        let (lock, cvar) = &*self.inner;
        let mut counters = lock_counters(lock);
        counters.in_flight[idx] = counters.in_flight[idx].saturating_sub(1);
        drop(counters);
        cvar.notify_all();
    }
}

#[must_use = "the slot is released as soon as the guard is dropped"]
pub struct SlotGuard {
    slots: ProviderSlots,
    idx: usize,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.slots.release(self.idx);
    }
}

/// FIFO handed to a fixed set of runner threads.
///
/// `next` blocks until an item arrives and returns `None` once the queue is
/// closed and drained. `finish` must follow every item `next` handed out.
#[derive(Debug)]
pub struct WorkQueue<T> {
    state: Mutex<QueueState<T>>,
    changed: Condvar,
}

#[derive(Debug)]
struct QueueState<T> {
    pending: VecDeque<T>,
    active: usize,
    closed: bool,
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                active: 0,
                closed: false,
            }),
            changed: Condvar::new(),
        }
    }
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, item: T) {
        self.lock().pending.push_back(item);
        self.changed.notify_all();
    }

    pub fn next(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(item) = state.pending.pop_front() {
                state.active += 1;
                return Some(item);
            }
            if state.closed {
                return None;
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn finish(&self) {
        let mut state = self.lock();
        state.active = state.active.saturating_sub(1);
        drop(state);
        self.changed.notify_all();
    }

    /// Blocks until nothing is pending or being worked on.
    pub fn wait_idle(&self) {
        let mut state = self.lock();
        while !state.pending.is_empty() || state.active > 0 {
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.changed.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lock_counters(lock: &Mutex<SlotCounters>) -> MutexGuard<'_, SlotCounters> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}
