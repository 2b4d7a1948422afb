// ── Inventory cache ──
//
// Location table swapped atomically on every inventory refresh. Devices
// are carried over by id so snapshot updates keep landing on the same
// `Arc<Device>` that consumers already hold.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use comfortlink_api::{DeviceDetail, LocationRecord};
use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

use crate::model::{Device, DeviceId, Location, LocationId};

/// New detail data for one device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotDelta {
    /// Fields merged over the existing snapshot; absent keys are kept.
    pub fields: Map<String, Value>,
    pub device_live: Option<bool>,
    pub communication_lost: Option<bool>,
}

impl From<Map<String, Value>> for SnapshotDelta {
    fn from(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }
}

impl From<&DeviceDetail> for SnapshotDelta {
    fn from(detail: &DeviceDetail) -> Self {
        Self {
            fields: detail.snapshot(),
            device_live: Some(detail.device_live),
            communication_lost: Some(detail.communication_lost),
        }
    }
}

#[derive(Default)]
struct Inventory {
    locations: IndexMap<LocationId, Arc<Location>>,
    /// Every device reachable from `locations`, and nothing else.
    devices: HashMap<DeviceId, Arc<Device>>,
}

/// In-memory location → device → snapshot table.
///
/// Readers get consistent snapshots without locking. Writes come from
/// the poll cycle, which serializes them.
pub struct InventoryCache {
    inventory: ArcSwap<Inventory>,
    last_refresh: watch::Sender<Option<DateTime<Utc>>>,
}

impl Default for InventoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryCache {
    pub fn new() -> Self {
        let (last_refresh, _) = watch::channel(None);
        Self {
            inventory: ArcSwap::from_pointee(Inventory::default()),
            last_refresh,
        }
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Swap in a freshly fetched location list. Returns the number of
    /// devices in the new table.
    ///
    /// Devices whose id was already known keep their instance and
    /// snapshot; devices no longer listed are dropped.
    pub fn replace_locations(&self, records: &[LocationRecord]) -> usize {
        let current = self.inventory.load();
        let mut locations: IndexMap<LocationId, Location> = IndexMap::with_capacity(records.len());
        let mut devices: HashMap<DeviceId, Arc<Device>> = HashMap::new();
        let mut added = 0usize;

        for record in records {
            let location_id = LocationId::new(record.location_id);
            let location = locations.entry(location_id).or_insert_with(|| Location {
                id: location_id,
                name: record.name.clone(),
                devices: IndexSet::with_capacity(record.devices.len()),
            });

            for device_record in &record.devices {
                let device_id = DeviceId::new(device_record.device_id);
                location.devices.insert(device_id);
                devices.entry(device_id).or_insert_with(|| {
                    if let Some(existing) = current.devices.get(&device_id) {
                        existing.apply_record(device_record);
                        Arc::clone(existing)
                    } else {
                        added += 1;
                        Arc::new(Device::from_record(device_record))
                    }
                });
            }
        }

        let removed = current
            .devices
            .keys()
            .filter(|id| !devices.contains_key(id))
            .count();
        let count = devices.len();

        self.inventory.store(Arc::new(Inventory {
            locations: locations
                .into_iter()
                .map(|(id, location)| (id, Arc::new(location)))
                .collect(),
            devices,
        }));
        self.last_refresh.send_replace(Some(Utc::now()));

        debug!(
            locations = records.len(),
            devices = count,
            added,
            removed,
            "inventory replaced"
        );
        count
    }

    /// Merge new fields into a device's snapshot.
    ///
    /// Returns the updated device, or `None` if the id is not in the
    /// inventory (it may have been removed since the detail fetch began).
    pub fn update_device_snapshot(
        &self,
        device_id: DeviceId,
        delta: impl Into<SnapshotDelta>,
    ) -> Option<Arc<Device>> {
        let Some(device) = self.lookup(device_id) else {
            debug!(device_id = %device_id, "dropping snapshot for unknown device");
            return None;
        };
        device.apply_delta(delta.into());
        Some(device)
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.inventory.store(Arc::new(Inventory::default()));
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn lookup(&self, device_id: DeviceId) -> Option<Arc<Device>> {
        self.inventory.load().devices.get(&device_id).cloned()
    }

    /// All locations in portal order.
    pub fn all_locations(&self) -> Vec<Arc<Location>> {
        self.inventory.load().locations.values().cloned().collect()
    }

    pub fn location(&self, location_id: LocationId) -> Option<Arc<Location>> {
        self.inventory.load().locations.get(&location_id).cloned()
    }

    /// The first location listing this device.
    pub fn location_of(&self, device_id: DeviceId) -> Option<Arc<Location>> {
        self.inventory
            .load()
            .locations
            .values()
            .find(|l| l.contains(device_id))
            .cloned()
    }

    /// Every device once, in location order.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        let inventory = self.inventory.load();
        let mut seen = IndexSet::with_capacity(inventory.devices.len());
        for location in inventory.locations.values() {
            seen.extend(location.device_ids());
        }
        seen.iter()
            .filter_map(|id| inventory.devices.get(id).cloned())
            .collect()
    }

    pub fn devices_in(&self, location_id: LocationId) -> Vec<Arc<Device>> {
        let inventory = self.inventory.load();
        inventory
            .locations
            .get(&location_id)
            .map(|location| {
                location
                    .device_ids()
                    .filter_map(|id| inventory.devices.get(&id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inventory.load().devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inventory.load().devices.is_empty()
    }

    /// When the inventory was last replaced.
    pub fn last_refresh(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.borrow()
    }

    pub fn subscribe_refresh(&self) -> watch::Receiver<Option<DateTime<Utc>>> {
        self.last_refresh.subscribe()
    }
}
