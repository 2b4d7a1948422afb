// Portal wire types
//
// Field names are the portal's own and must not change. Only the fields
// the engine reads are typed; everything else is kept in `extra` or the
// raw `uiData` / `fanData` maps.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One entry of the location list returned by the inventory endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(rename = "LocationID")]
    pub location_id: u64,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Devices", default)]
    pub devices: Vec<DeviceRecord>,
}

/// A thermostat as listed inside a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    #[serde(rename = "DeviceID")]
    pub device_id: u64,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "MacID", default)]
    pub mac_id: Option<String>,
    #[serde(rename = "IsAlive", default)]
    pub is_alive: Option<bool>,
    /// Remaining inventory fields, untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reply of the per-device detail endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceDetail {
    #[serde(rename = "deviceLive", default)]
    pub device_live: bool,
    #[serde(rename = "communicationLost", default)]
    pub communication_lost: bool,
    #[serde(rename = "latestData", default)]
    pub latest_data: LatestData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestData {
    #[serde(rename = "uiData", default)]
    pub ui_data: Map<String, Value>,
    #[serde(rename = "fanData", default)]
    pub fan_data: Map<String, Value>,
    #[serde(rename = "hasFan", default)]
    pub has_fan: bool,
}

impl DeviceDetail {
    /// Flattened key/value view: `uiData` fields, then `fanData` fields.
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut snapshot = self.latest_data.ui_data.clone();
        snapshot.extend(
            self.latest_data
                .fan_data
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        snapshot
    }
}

/// Body of a control submission. `None` fields are sent as `null`, which
/// the portal reads as "leave unchanged".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlChange {
    #[serde(rename = "DeviceID")]
    pub device_id: u64,
    #[serde(rename = "SystemSwitch")]
    pub system_switch: Option<u8>,
    #[serde(rename = "HeatSetpoint")]
    pub heat_setpoint: Option<f64>,
    #[serde(rename = "CoolSetpoint")]
    pub cool_setpoint: Option<f64>,
    #[serde(rename = "HeatNextPeriod")]
    pub heat_next_period: Option<u32>,
    #[serde(rename = "CoolNextPeriod")]
    pub cool_next_period: Option<u32>,
    #[serde(rename = "StatusHeat")]
    pub status_heat: Option<u8>,
    #[serde(rename = "StatusCool")]
    pub status_cool: Option<u8>,
    #[serde(rename = "FanMode")]
    pub fan_mode: Option<u8>,
}

impl ControlChange {
    pub fn for_device(device_id: u64) -> Self {
        Self {
            device_id,
            ..Self::default()
        }
    }
}
