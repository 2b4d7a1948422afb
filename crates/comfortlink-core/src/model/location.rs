// ── Location ──

use indexmap::IndexSet;

use super::ids::{DeviceId, LocationId};

/// A portal location and the devices it lists, in portal order.
///
/// Rebuilt wholesale on every inventory refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub(crate) id: LocationId,
    pub(crate) name: String,
    pub(crate) devices: IndexSet<DeviceId>,
}

impl Location {
    pub fn id(&self) -> LocationId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device_ids(&self) -> impl Iterator<Item = DeviceId> + '_ {
        self.devices.iter().copied()
    }

    pub fn contains(&self, device_id: DeviceId) -> bool {
        self.devices.contains(&device_id)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}
