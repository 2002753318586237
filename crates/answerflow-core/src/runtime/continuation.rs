//! Suspend/resume bridge for the asynchronous transcription step.
//!
//! The suspended side registers a correlation id and awaits it; the
//! collecting side resumes the same id with an outcome. A resume may land
//! before the waiter registers, in which case the outcome is parked until
//! it does. Once an id has been delivered or abandoned, later outcomes for
//! it are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::debug;

/// Parked outcomes nobody registered for, and closed ids, are dropped
/// after this long.
const PARKED_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationOutcome {
    Success,
    Failure(String),
}

#[derive(Debug)]
enum Slot {
    Waiting(oneshot::Sender<ContinuationOutcome>),
    Parked {
        outcome: ContinuationOutcome,
        at: Instant,
    },
    /// Delivered or abandoned.
    Closed { at: Instant },
}

#[derive(Debug, Clone, Default)]
pub struct ContinuationRegistry {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

/// The waiting half of a registered correlation id.
#[derive(Debug)]
pub struct Continuation {
    id: String,
    rx: oneshot::Receiver<ContinuationOutcome>,
}

impl Continuation {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `None` when the registration was abandoned.
    pub async fn wait(self) -> Option<ContinuationOutcome> {
        self.rx.await.ok()
    }
}

impl ContinuationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, id: &str) -> Continuation {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.lock();
        prune(&mut slots);
        match slots.remove(id) {
            Some(Slot::Parked { outcome, .. }) => {
                debug!(correlation_id = id, "continuation resumed before registration");
                let _ = tx.send(outcome);
            }
            Some(Slot::Waiting(_)) | Some(Slot::Closed { .. }) | None => {
                slots.insert(id.to_owned(), Slot::Waiting(tx));
            }
        }
        Continuation {
            id: id.to_owned(),
            rx,
        }
    }

    /// Deliver `outcome` to the waiter for `id`. Returns `true` when a waiter
    /// received it. With nobody registered yet the first outcome is parked;
    /// a closed id drops it.
    pub fn resume(&self, id: &str, outcome: ContinuationOutcome) -> bool {
        let mut slots = self.lock();
        prune(&mut slots);
        match slots.remove(id) {
            Some(Slot::Waiting(tx)) => {
                debug!(correlation_id = id, ?outcome, "continuation resumed");
                slots.insert(id.to_owned(), Slot::Closed { at: Instant::now() });
                tx.send(outcome).is_ok()
            }
            Some(kept @ (Slot::Parked { .. } | Slot::Closed { .. })) => {
                debug!(correlation_id = id, "continuation already resolved");
                slots.insert(id.to_owned(), kept);
                false
            }
            None => {
                slots.insert(
                    id.to_owned(),
                    Slot::Parked {
                        outcome,
                        at: Instant::now(),
                    },
                );
                false
            }
        }
    }

    /// Forget `id`. A pending waiter observes `None`.
    pub fn abandon(&self, id: &str) {
        let mut slots = self.lock();
        if let Some(Slot::Waiting(_)) = slots.insert(id.to_owned(), Slot::Closed { at: Instant::now() }) {
            debug!(correlation_id = id, "continuation abandoned");
        }
    }

    pub fn pending(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Waiting(_)))
            .count()
    }
}

fn prune(slots: &mut HashMap<String, Slot>) {
    slots.retain(|_, slot| match slot {
        Slot::Parked { at, .. } | Slot::Closed { at } => at.elapsed() < PARKED_TTL,
        Slot::Waiting(tx) => !tx.is_closed(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resume_after_register() {
        let registry = ContinuationRegistry::new();
        let continuation = registry.register("c-1");
        assert_eq!(registry.pending(), 1);
        assert!(registry.resume("c-1", ContinuationOutcome::Success));
        assert_eq!(continuation.wait().await, Some(ContinuationOutcome::Success));
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn resume_before_register_is_parked() {
        let registry = ContinuationRegistry::new();
        assert!(!registry.resume("c-2", ContinuationOutcome::Failure("boom".into())));
        // Later outcomes for the same id do not replace the first.
        assert!(!registry.resume("c-2", ContinuationOutcome::Success));
        let continuation = registry.register("c-2");
        assert_eq!(
            continuation.wait().await,
            Some(ContinuationOutcome::Failure("boom".into()))
        );
    }

    #[tokio::test]
    async fn abandon_releases_the_waiter() {
        let registry = ContinuationRegistry::new();
        let continuation = registry.register("c-3");
        registry.abandon("c-3");
        assert_eq!(continuation.wait().await, None);
        assert_eq!(registry.pending(), 0);
    }

    #[tokio::test]
    async fn outcomes_after_abandon_or_delivery_are_not_parked() {
        let registry = ContinuationRegistry::new();
        let abandoned = registry.register("c-4");
        registry.abandon("c-4");
        drop(abandoned);
        assert!(!registry.resume("c-4", ContinuationOutcome::Success));

        let delivered = registry.register("c-5");
        assert!(registry.resume("c-5", ContinuationOutcome::Success));
        assert_eq!(delivered.wait().await, Some(ContinuationOutcome::Success));
        assert!(!registry.resume("c-5", ContinuationOutcome::Failure("late".into())));

        let slots = registry.lock();
        assert!(
            slots
                .values()
                .all(|slot| matches!(slot, Slot::Closed { .. })),
            "{slots:?}"
        );
    }

    #[test]
    fn stale_slots_are_pruned_on_resume() {
        let registry = ContinuationRegistry::new();
        let Some(long_ago) = Instant::now().checked_sub(PARKED_TTL + Duration::from_secs(1)) else {
            return;
        };
        registry.lock().insert(
            "old".into(),
            Slot::Parked {
                outcome: ContinuationOutcome::Success,
                at: long_ago,
            },
        );
        registry
            .lock()
            .insert("gone".into(), Slot::Closed { at: long_ago });

        registry.resume("fresh", ContinuationOutcome::Success);
        let slots = registry.lock();
        assert_eq!(slots.len(), 1);
        assert!(slots.contains_key("fresh"));
    }
}
