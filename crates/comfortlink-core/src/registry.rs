// ── Device consumer registry ──
//
// Maps a device to at most one consumer callback. The poll cycle
// dispatches through here without knowing what consumers do.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::model::{Device, DeviceId};

/// Error a consumer may return; logged and otherwise ignored.
pub type ConsumerError = Box<dyn std::error::Error + Send + Sync>;

type Consumer = Arc<dyn Fn(&Arc<Device>) -> Result<(), ConsumerError> + Send + Sync>;

/// What happened when a device update was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// No consumer registered for the device.
    NoConsumer,
    Delivered,
    /// The consumer returned an error or panicked.
    Failed,
}

/// Registry of per-device consumers.
#[derive(Default)]
pub struct DeviceConsumerRegistry {
    consumers: DashMap<DeviceId, Consumer>,
}

impl DeviceConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `consumer` for `device_id`, replacing any previous one.
    /// Returns `true` if a previous consumer was replaced.
    pub fn register<F>(&self, device_id: DeviceId, consumer: F) -> bool
    where
        F: Fn(&Arc<Device>) -> Result<(), ConsumerError> + Send + Sync + 'static,
    {
        let replaced = self
            .consumers
            .insert(device_id, Arc::new(consumer))
            .is_some();
        debug!(device_id = %device_id, replaced, "consumer registered");
        replaced
    }

    /// Remove the consumer for `device_id`. Returns `true` if one was registered.
    pub fn unregister(&self, device_id: DeviceId) -> bool {
        let removed = self.consumers.remove(&device_id).is_some();
        if removed {
            debug!(device_id = %device_id, "consumer unregistered");
        }
        removed
    }

    pub fn is_registered(&self, device_id: DeviceId) -> bool {
        self.consumers.contains_key(&device_id)
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn clear(&self) {
        self.consumers.clear();
    }

    /// Hand an updated device to its consumer.
    ///
    /// The consumer runs without any registry lock held, so it may
    /// register or unregister consumers itself. Errors and panics are
    /// contained here.
    pub fn dispatch(&self, device: &Arc<Device>) -> DispatchOutcome {
        let device_id = device.id();
        let Some(consumer) = self
            .consumers
            .get(&device_id)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return DispatchOutcome::NoConsumer;
        };

        match catch_unwind(AssertUnwindSafe(|| consumer(device))) {
            Ok(Ok(())) => DispatchOutcome::Delivered,
            Ok(Err(e)) => {
                warn!(device_id = %device_id, error = %e, "consumer rejected update");
                DispatchOutcome::Failed
            }
            Err(_) => {
                warn!(device_id = %device_id, "consumer panicked during update");
                DispatchOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use comfortlink_api::DeviceRecord;
    use serde_json::json;

    use super::*;

    fn device(id: u64) -> Arc<Device> {
        let record: DeviceRecord =
            serde_json::from_value(json!({"DeviceID": id, "Name": "T"})).unwrap();
        Arc::new(Device::from_record(&record))
    }

    #[test]
    fn at_most_one_consumer_per_device() {
        let registry = DeviceConsumerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&first);
        assert!(!registry.register(DeviceId::new(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let counter = Arc::clone(&second);
        assert!(registry.register(DeviceId::new(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(registry.dispatch(&device(1)), DispatchOutcome::Delivered);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregistered_device_is_not_dispatched() {
        let registry = DeviceConsumerRegistry::new();
        registry.register(DeviceId::new(1), |_| Ok(()));
        assert!(registry.unregister(DeviceId::new(1)));
        assert!(!registry.unregister(DeviceId::new(1)));
        assert_eq!(registry.dispatch(&device(1)), DispatchOutcome::NoConsumer);
    }

    #[test]
    fn consumer_errors_and_panics_are_contained() {
        let registry = DeviceConsumerRegistry::new();
        registry.register(DeviceId::new(1), |_| Err("channel closed".into()));
        registry.register(DeviceId::new(2), |_| panic!("consumer bug"));

        assert_eq!(registry.dispatch(&device(1)), DispatchOutcome::Failed);
        assert_eq!(registry.dispatch(&device(2)), DispatchOutcome::Failed);
        assert!(registry.is_registered(DeviceId::new(2)));
    }

    #[test]
    fn consumer_may_unregister_itself() {
        let registry = Arc::new(DeviceConsumerRegistry::new());
        let handle = Arc::downgrade(&registry);
        registry.register(DeviceId::new(1), move |device| {
            if let Some(registry) = handle.upgrade() {
                registry.unregister(device.id());
            }
            Ok(())
        });

        assert_eq!(registry.dispatch(&device(1)), DispatchOutcome::Delivered);
        assert!(registry.is_empty());
    }
}
