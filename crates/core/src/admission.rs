//! Bounded-concurrency admission for jobs.
//!
//! A job holds an [`AdmissionPermit`] from the moment it is accepted until it
//! reaches a terminal state. The permit releases its slot when dropped, so the
//! active count is decremented exactly once per admitted job regardless of
//! how the job task ends.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

/// Gates how many jobs may be active at once.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    max_active: usize,
    active: Arc<AtomicUsize>,
}

impl AdmissionController {
    /// Create a controller allowing at most `max_active` concurrent jobs.
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Try to take a slot. Returns `None` without side effects when full.
    pub fn try_admit(&self) -> Option<AdmissionPermit> {
        let admitted = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_active).then_some(current + 1)
            });

        match admitted {
            Ok(previous) => {
                debug!("Admitted job ({}/{})", previous + 1, self.max_active);
                Some(AdmissionPermit {
                    active: Arc::clone(&self.active),
                })
            }
            Err(_) => None,
        }
    }

    /// Number of jobs currently holding a permit.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Configured concurrency cap.
    pub fn max_active(&self) -> usize {
        self.max_active
    }
}

/// A held admission slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    active: Arc<AtomicUsize>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let previous = self.active.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "admission count underflow");
    }
}
