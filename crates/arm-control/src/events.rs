//! Joint-change notifications for the visual layer.
//!
//! The Robot emits a [`JointChange`] after every successful apply step.
//! Subscribers register a callback and hold the returned [`Subscription`];
//! dropping the guard deregisters the callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// One joint's new normalized value, with any declared radian limits so the
/// subscriber can convert to a render angle.
#[derive(Clone, Debug, PartialEq)]
pub struct JointChange {
    pub name: String,
    pub value: f64,
    pub limits: Option<(f64, f64)>,
}

type Callback = Box<dyn Fn(&JointChange) + Send + Sync>;
type Registry = Mutex<HashMap<u64, Callback>>;

#[derive(Clone, Default)]
pub struct JointObservers {
    registry: Arc<Registry>,
    next_id: Arc<AtomicU64>,
}

impl JointObservers {
    pub fn subscribe(
        &self,
        callback: impl Fn(&JointChange) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut registry) = self.registry.lock() {
            registry.insert(id, Box::new(callback));
        }
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub(crate) fn emit(&self, change: &JointChange) {
        if let Ok(registry) = self.registry.lock() {
            for callback in registry.values() {
                callback(change);
            }
        }
    }
}

/// RAII deregistration guard returned by [`JointObservers::subscribe`].
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            if let Ok(mut registry) = registry.lock() {
                registry.remove(&self.id);
            }
        }
    }
}
