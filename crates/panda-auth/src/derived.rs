//! Values derived from the session identity.
//!
//! [`derive_from_identity`] recomputes an async value whenever the session's
//! identity handle changes. Re-publications of the same handle are ignored.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tracing::debug;

use crate::client::IdentityClient;
use crate::identity::Identity;
use crate::session::SessionStore;
use crate::store::{Readable, Subscription, Writable};

/// Last identity handed to the factory and the generation of that call.
struct KeyGuard {
    last: Identity,
    generation: u64,
}

/// Read-only value recomputed from the session identity.
///
/// Dropping it detaches from the session store.
pub struct Derived<T> {
    value: Writable<T>,
    _upstream: Subscription,
}

impl<T> Readable<T> for Derived<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn get(&self) -> T {
        self.value.get()
    }

    fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.value.subscribe(listener)
    }
}

/// Builds a value from `factory`, keyed on the session identity.
///
/// The initial value is `factory(anonymous)`. If the store already holds a
/// different identity, one recomputation is started right away. After that,
/// the factory runs once per distinct identity handle. Recomputations run on
/// the current tokio runtime; a result is only published if its identity is
/// still the latest one.
///
/// # Panics
/// Panics if called outside a tokio runtime.
pub async fn derive_from_identity<C, T, F, Fut>(store: &SessionStore<C>, factory: F) -> Derived<T>
where
    C: IdentityClient,
    T: Clone + Send + Sync + 'static,
    F: Fn(Identity) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = T> + Send + 'static,
{
    let anonymous = Identity::anonymous();
    let initial = factory(anonymous.clone()).await;
    let value = Writable::new(initial);

    let factory = Arc::new(factory);
    let guard = Arc::new(Mutex::new(KeyGuard {
        last: anonymous,
        generation: 0,
    }));
    let runtime = Handle::current();

    let target = value.clone();
    let upstream = store.subscribe(move |session| {
        let generation = {
            let mut key = guard.lock().unwrap_or_else(PoisonError::into_inner);
            if Identity::ptr_eq(&key.last, &session.identity) {
                return;
            }
            key.last = session.identity.clone();
            key.generation += 1;
            key.generation
        };

        debug!(generation, principal = %session.identity.principal(), "recomputing derived value");
        let factory = Arc::clone(&factory);
        let guard = Arc::clone(&guard);
        let target = target.clone();
        let identity = session.identity.clone();
        runtime.spawn(async move {
            let next = factory(identity).await;
            let current = guard
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .generation;
            if current == generation {
                target.set(next);
            } else {
                debug!(generation, current, "dropping stale derived value");
            }
        });
    });

    Derived {
        value,
        _upstream: upstream,
    }
}
