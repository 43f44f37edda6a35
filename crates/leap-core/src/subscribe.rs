// ── Per-topic observer registries ──
//
// One registry per topic (device state, button events, occupancy).
// Observers run synchronously on the read-loop task, in registration
// order; a panicking observer is logged and must not disturb delivery
// to its peers.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::warn;

type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Returned by the `add_*_subscriber` methods; consumes itself to
/// detach the observer. Dropping the handle leaves the observer
/// registered.
pub struct SubscriberHandle {
    registry: Weak<dyn Unsubscribe>,
    entity_id: u32,
    token: u64,
}

impl SubscriberHandle {
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.entity_id, self.token);
        }
    }
}

impl std::fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberHandle")
            .field("entity_id", &self.entity_id)
            .field("token", &self.token)
            .finish()
    }
}

trait Unsubscribe: Send + Sync {
    fn remove(&self, entity_id: u32, token: u64);
}

// ── SubscriberRegistry ──────────────────────────────────────────────

pub(crate) struct SubscriberRegistry<A> {
    inner: Arc<RegistryInner<A>>,
}

struct RegistryInner<A> {
    slots: DashMap<u32, BTreeMap<u64, Callback<A>>>,
    next_token: AtomicU64,
}

impl<A: 'static> SubscriberRegistry<A> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                slots: DashMap::new(),
                next_token: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn add(
        &self,
        entity_id: u32,
        callback: impl Fn(&A) + Send + Sync + 'static,
    ) -> SubscriberHandle {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        self.inner
            .slots
            .entry(entity_id)
            .or_default()
            .insert(token, Arc::new(callback));

        let registry: Arc<dyn Unsubscribe> = self.inner.clone();
        SubscriberHandle {
            registry: Arc::downgrade(&registry),
            entity_id,
            token,
        }
    }

    /// Invoke every observer for `entity_id`, in registration order.
    pub(crate) fn notify(&self, entity_id: u32, argument: &A) {
        let callbacks: Vec<Callback<A>> = match self.inner.slots.get(&entity_id) {
            Some(slot) => slot.values().cloned().collect(),
            None => return,
        };

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(argument))).is_err() {
                warn!(entity_id, "subscriber panicked; continuing delivery");
            }
        }
    }
}

impl<A: 'static> Unsubscribe for RegistryInner<A> {
    fn remove(&self, entity_id: u32, token: u64) {
        if let Some(mut slot) = self.slots.get_mut(&entity_id) {
            slot.remove(&token);
        }
    }
}
