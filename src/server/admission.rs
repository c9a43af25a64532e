//! Connection admission control.
//!
//! A single atomic counter of live connections, checked and incremented in one
//! step. Each granted admission is an [`Admission`] guard that gives its slot
//! back exactly once when dropped, however the connection ends.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
pub struct AdmissionController {
    live: Arc<AtomicUsize>,
    limit: Option<usize>,
}

impl AdmissionController {
    /// `max_connections < 0` means unbounded.
    pub fn new(max_connections: i64) -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            limit: usize::try_from(max_connections).ok(),
        }
    }

    /// Admits one more connection unless the ceiling has been reached.
    /// Denials leave the counter untouched.
    pub fn try_admit(&self) -> Option<Admission> {
        match self.limit {
            None => {
                self.live.fetch_add(1, Ordering::AcqRel);
            }
            Some(limit) => {
                self.live
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < limit).then_some(n + 1)
                    })
                    .ok()?;
            }
        }

        Some(Admission {
            live: Arc::clone(&self.live),
        })
    }

    /// Number of currently admitted connections.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// Proof of admission. Dropping it releases the connection slot.
#[derive(Debug)]
pub struct Admission {
    live: Arc<AtomicUsize>,
}

impl Admission {
    /// Releases the slot now rather than at the end of scope.
    pub fn release(self) {}
}

impl Drop for Admission {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_limit_denies_everything() {
        let controller = AdmissionController::new(0);
        assert!(controller.try_admit().is_none());
        assert_eq!(controller.live(), 0);
    }

    #[test]
    fn negative_limit_is_unbounded() {
        let controller = AdmissionController::new(-1);
        let guards: Vec<_> = (0..100).filter_map(|_| controller.try_admit()).collect();
        assert_eq!(guards.len(), 100);
        assert_eq!(controller.limit(), None);

        drop(guards);
        assert_eq!(controller.live(), 0);
    }
}
