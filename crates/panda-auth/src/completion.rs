//! Single-resolution completion for callback-style APIs.
//!
//! [`Completion`] is the settling side. It can be cloned and handed to several
//! callbacks; the first `resolve`/`reject` wins and later calls are ignored.
//! [`Pending`] is the awaiting side.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::oneshot;

type Slot<T, E> = Arc<Mutex<Option<oneshot::Sender<Result<T, E>>>>>;

pub struct Completion<T, E> {
    slot: Slot<T, E>,
}

impl<T, E> Clone for Completion<T, E> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

/// Awaiting side of a [`Completion`].
pub struct Pending<T, E> {
    rx: oneshot::Receiver<Result<T, E>>,
}

/// Creates a connected completion pair.
pub fn channel<T, E>() -> (Completion<T, E>, Pending<T, E>) {
    let (tx, rx) = oneshot::channel();
    (
        Completion {
            slot: Arc::new(Mutex::new(Some(tx))),
        },
        Pending { rx },
    )
}

impl<T, E> Completion<T, E> {
    /// Settles with a value. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settles with an error. Returns `false` if already settled.
    pub fn reject(&self, error: E) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Result<T, E>) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(tx) => {
                // A dropped receiver still counts as settled.
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }
}

impl<T, E> Pending<T, E> {
    /// Waits for the outcome. `None` means every [`Completion`] handle was
    /// dropped without settling.
    pub async fn settled(self) -> Option<Result<T, E>> {
        self.rx.await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_settle_wins() {
        let (completion, pending) = channel::<u32, String>();
        let other = completion.clone();

        assert!(completion.resolve(1));
        assert!(!other.reject("late".to_string()));
        assert!(!completion.resolve(2));
        assert!(!other.resolve(3));

        assert_eq!(pending.settled().await, Some(Ok(1)));
    }

    #[tokio::test]
    async fn test_reject() {
        let (completion, pending) = channel::<u32, String>();
        assert!(completion.reject("denied".to_string()));
        assert_eq!(pending.settled().await, Some(Err("denied".to_string())));
    }

    #[tokio::test]
    async fn test_dropped_unsettled_reports_abandoned() {
        let (completion, pending) = channel::<u32, String>();
        let other = completion.clone();
        drop(completion);
        drop(other);
        assert_eq!(pending.settled().await, None);
    }
}
