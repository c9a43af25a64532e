//! Pooled request/response pairs, one arena entry per connection slot.
//!
//! A connection takes its pair out with [`ContextPool::acquire`], serves one
//! request with it and puts it back with [`ContextPool::release`]. Only a
//! cleanly finished keep-alive exchange goes back into the pool; anything else
//! tears the slot down. A slot never has more than one pair outstanding.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::error::PoolError;
use crate::http::request::Request;
use crate::http::response::Response;

/// Relaxed ordering is enough: ids only need to be unique.
static SLOT_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identifies one connection-processing slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

impl SlotId {
    pub fn new() -> Self {
        Self(SLOT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SlotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

/// What [`ContextPool::release`] did with a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Release {
    /// Back in the slot, ready for the next request on the connection.
    Recycled,
    /// Dropped together with the slot; the connection must close.
    Discarded,
}

#[derive(Default)]
struct Slot {
    idle: Option<(Request, Response)>,
    outstanding: bool,
    served: u64,
}

#[derive(Default)]
pub struct ContextPool {
    slots: Mutex<HashMap<SlotId, Slot>>,
}

impl ContextPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SlotId, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes the slot's pair, resetting a recycled one, or builds a new pair.
    pub fn acquire(&self, slot: SlotId) -> Result<(Request, Response), PoolError> {
        let idle = {
            let mut slots = self.lock();
            let entry = slots.entry(slot).or_default();
            if entry.outstanding {
                return Err(PoolError::SlotBusy(slot));
            }
            entry.outstanding = true;
            entry.served += 1;
            entry.idle.take()
        };

        match idle {
            Some((mut request, mut response)) => {
                tracing::trace!(slot = %slot, "reusing pooled exchange");
                request.reset();
                response.reset();
                Ok((request, response))
            }
            None => Ok((Request::new(), Response::new())),
        }
    }

    /// Returns a pair after its response completed.
    ///
    /// The pair is pooled only if the response finished on a live connection,
    /// is not suspended and the connection stays alive. Otherwise it is
    /// dropped and the slot torn down.
    pub fn release(&self, slot: SlotId, request: Request, mut response: Response) -> Release {
        let recyclable = response.is_finished()
            && !response.is_abandoned()
            && !response.is_suspended()
            && response.is_keep_alive();

        let mut slots = self.lock();
        if recyclable {
            if let Some(entry) = slots.get_mut(&slot) {
                response.unbind();
                entry.outstanding = false;
                entry.idle = Some((request, response));
                return Release::Recycled;
            }
        }

        tracing::trace!(slot = %slot, "discarding exchange");
        slots.remove(&slot);
        Release::Discarded
    }

    /// Tears down a slot once its connection has closed, dropping any pooled
    /// pair. Returns whether the slot existed.
    pub fn free_after_keep_alive(&self, slot: SlotId) -> bool {
        self.lock().remove(&slot).is_some()
    }

    pub fn is_outstanding(&self, slot: SlotId) -> bool {
        self.lock().get(&slot).is_some_and(|s| s.outstanding)
    }

    /// Whether the slot holds a pair ready for reuse.
    pub fn has_idle(&self, slot: SlotId) -> bool {
        self.lock().get(&slot).is_some_and(|s| s.idle.is_some())
    }

    /// Requests served by the slot so far.
    pub fn served(&self, slot: SlotId) -> u64 {
        self.lock().get(&slot).map_or(0, |s| s.served)
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl fmt::Debug for ContextPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextPool").field("slots", &self.len()).finish()
    }
}
