//! Reactive value store.
//!
//! A [`Writable`] holds one value and a list of listeners. Listeners are called
//! synchronously, in registration order, every time the value is replaced.
//!
//! Delivery is serialized through a notification queue: a `set` issued from
//! inside a listener (or from another thread while a round is being delivered)
//! is queued and delivered after the current round, so every listener observes
//! values in assignment order. Each queued round carries the listener list as
//! it was at assignment time; listeners added later only see newer values, and
//! a listener unsubscribed mid-delivery is skipped for the rounds still queued.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(0);

struct State<T> {
    value: T,
    listeners: Vec<(u64, Listener<T>)>,
    pending: VecDeque<(T, Vec<(u64, Listener<T>)>)>,
    delivering: bool,
}

struct Inner<T> {
    state: Mutex<State<T>>,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        // Listeners run outside the lock, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle returned by `subscribe`. Dropping it detaches the listener.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detaches the listener now.
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}

/// Read-only view of a store.
pub trait Readable<T> {
    /// Returns a snapshot of the current value.
    fn get(&self) -> T;

    /// Registers `listener`; it is invoked immediately with the current value
    /// and again on every change.
    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static;
}

/// Writable reactive value.
pub struct Writable<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Writable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Writable<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    value,
                    listeners: Vec::new(),
                    pending: VecDeque::new(),
                    delivering: false,
                }),
            }),
        }
    }

    /// Replaces the value and notifies every listener.
    pub fn set(&self, value: T) {
        let mut state = self.inner.lock();
        let listeners = state
            .listeners
            .iter()
            .map(|(id, l)| (*id, Arc::clone(l)))
            .collect();
        state.value = value.clone();
        state.pending.push_back((value, listeners));
        if state.delivering {
            return;
        }
        state.delivering = true;
        drop(state);
        self.deliver();
    }

    /// Replaces the value with `f(current)`.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.get());
        self.set(next);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    fn deliver(&self) {
        loop {
            let next = {
                let mut state = self.inner.lock();
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.delivering = false;
                }
                next
            };
            let Some((value, listeners)) = next else {
                return;
            };
            for (id, listener) in &listeners {
                if self.is_registered(*id) {
                    listener(&value);
                }
            }
        }
    }

    fn is_registered(&self, id: u64) -> bool {
        self.inner.lock().listeners.iter().any(|(lid, _)| *lid == id)
    }

    fn detach_handle(&self, id: u64) -> impl FnOnce() + Send + Sync + 'static {
        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        move || {
            if let Some(inner) = weak.upgrade() {
                inner.lock().listeners.retain(|(lid, _)| *lid != id);
            }
        }
    }
}

impl<T> Readable<T> for Writable<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.inner.lock().value.clone()
    }

    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        let listener: Listener<T> = Arc::new(listener);
        let current = {
            let mut state = self.inner.lock();
            state.listeners.push((id, Arc::clone(&listener)));
            state.value.clone()
        };
        listener(&current);
        Subscription::new(self.detach_handle(id))
    }
}
