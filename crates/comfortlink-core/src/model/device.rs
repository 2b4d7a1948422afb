// ── Device domain types ──

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use comfortlink_api::DeviceRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString, FromRepr};

use super::ids::DeviceId;
use crate::store::SnapshotDelta;

// ── Snapshot keys ────────────────────────────────────────────────────

const INDOOR_TEMPERATURE: &str = "DispTemperature";
const OUTDOOR_TEMPERATURE: &str = "OutdoorTemperature";
const OUTDOOR_TEMPERATURE_AVAILABLE: &str = "OutdoorTemperatureAvailable";
const INDOOR_HUMIDITY: &str = "IndoorHumidity";
const INDOOR_HUMIDITY_AVAILABLE: &str = "IndoorHumiditySensorAvailable";
const HEAT_SETPOINT: &str = "HeatSetpoint";
const COOL_SETPOINT: &str = "CoolSetpoint";
const SYSTEM_SWITCH: &str = "SystemSwitchPosition";
const FAN_MODE: &str = "fanMode";
const DISPLAY_UNITS: &str = "DisplayUnits";

// ── Enums ────────────────────────────────────────────────────────────

/// Thermostat system switch position, as numbered by the portal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, FromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum SystemMode {
    EmergencyHeat = 0,
    Heat = 1,
    Off = 2,
    Cool = 3,
    Auto = 4,
}

impl SystemMode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Fan switch position, as numbered by the portal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, FromRepr,
)]
#[repr(u8)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum FanMode {
    Auto = 0,
    On = 1,
    Circulate = 2,
    FollowSchedule = 3,
}

impl FanMode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Temperature scale the thermostat reports in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum DisplayUnits {
    #[strum(serialize = "F")]
    Fahrenheit,
    #[strum(serialize = "C")]
    Celsius,
}

// ── Device ───────────────────────────────────────────────────────────

/// Point-in-time view of a device's mutable data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceState {
    pub name: String,
    pub mac_id: Option<String>,
    /// Flattened `uiData` + `fanData` fields from the last detail fetch,
    /// merged over earlier ones.
    pub snapshot: Map<String, Value>,
    /// Inventory `IsAlive`, then detail `deviceLive` once fetched.
    pub alive: Option<bool>,
    pub communication_lost: bool,
    /// When the snapshot last changed. `None` until the first detail fetch.
    pub updated_at: Option<DateTime<Utc>>,
}

/// A thermostat known to the inventory.
///
/// Identity is the [`DeviceId`]. The instance lives as long as the device
/// stays in the account and is updated in place by the poll cycle, so
/// consumers holding an `Arc<Device>` always read the latest data.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    state: ArcSwap<DeviceState>,
}

impl Device {
    pub(crate) fn from_record(record: &DeviceRecord) -> Self {
        Self {
            id: DeviceId::new(record.device_id),
            state: ArcSwap::from_pointee(DeviceState {
                name: record.name.clone(),
                mac_id: record.mac_id.clone(),
                alive: record.is_alive,
                ..DeviceState::default()
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Current state (cheap `Arc` clone).
    pub fn state(&self) -> Arc<DeviceState> {
        self.state.load_full()
    }

    pub fn name(&self) -> String {
        self.state.load().name.clone()
    }

    pub fn mac_id(&self) -> Option<String> {
        self.state.load().mac_id.clone()
    }

    /// Copy of the raw snapshot map.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.state.load().snapshot.clone()
    }

    /// One raw snapshot field.
    pub fn field(&self, key: &str) -> Option<Value> {
        self.state.load().snapshot.get(key).cloned()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.state.load().updated_at
    }

    pub fn is_alive(&self) -> bool {
        self.state.load().alive.unwrap_or(false)
    }

    pub fn communication_lost(&self) -> bool {
        self.state.load().communication_lost
    }

    // ── Typed projection ─────────────────────────────────────────────

    pub fn indoor_temperature(&self) -> Option<f64> {
        self.number(INDOOR_TEMPERATURE)
    }

    pub fn outdoor_temperature(&self) -> Option<f64> {
        self.available_number(OUTDOOR_TEMPERATURE, OUTDOOR_TEMPERATURE_AVAILABLE)
    }

    pub fn indoor_humidity(&self) -> Option<f64> {
        self.available_number(INDOOR_HUMIDITY, INDOOR_HUMIDITY_AVAILABLE)
    }

    pub fn heat_setpoint(&self) -> Option<f64> {
        self.number(HEAT_SETPOINT)
    }

    pub fn cool_setpoint(&self) -> Option<f64> {
        self.number(COOL_SETPOINT)
    }

    pub fn system_mode(&self) -> Option<SystemMode> {
        self.code(SYSTEM_SWITCH).and_then(SystemMode::from_repr)
    }

    pub fn fan_mode(&self) -> Option<FanMode> {
        self.code(FAN_MODE).and_then(FanMode::from_repr)
    }

    pub fn display_units(&self) -> Option<DisplayUnits> {
        self.state
            .load()
            .snapshot
            .get(DISPLAY_UNITS)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    // ── Mutation (poll cycle only) ───────────────────────────────────

    /// Refresh inventory-level attributes; the snapshot is kept.
    pub(crate) fn apply_record(&self, record: &DeviceRecord) {
        let current = self.state.load();
        if current.name == record.name
            && current.mac_id == record.mac_id
            && (record.is_alive.is_none() || current.alive == record.is_alive)
        {
            return;
        }
        let mut next = DeviceState::clone(&current);
        next.name.clone_from(&record.name);
        next.mac_id.clone_from(&record.mac_id);
        if record.is_alive.is_some() {
            next.alive = record.is_alive;
        }
        self.state.store(Arc::new(next));
    }

    /// Merge a detail delta over the current snapshot.
    pub(crate) fn apply_delta(&self, delta: SnapshotDelta) {
        let mut next = DeviceState::clone(&self.state.load());
        next.snapshot.extend(delta.fields);
        if let Some(live) = delta.device_live {
            next.alive = Some(live);
        }
        if let Some(lost) = delta.communication_lost {
            next.communication_lost = lost;
        }
        next.updated_at = Some(Utc::now());
        self.state.store(Arc::new(next));
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn number(&self, key: &str) -> Option<f64> {
        self.state.load().snapshot.get(key).and_then(as_number)
    }

    /// A numeric field gated by its portal "sensor available" flag. A
    /// missing flag does not hide the value.
    fn available_number(&self, key: &str, flag: &str) -> Option<f64> {
        let state = self.state.load();
        if state.snapshot.get(flag).and_then(Value::as_bool) == Some(false) {
            return None;
        }
        state.snapshot.get(key).and_then(as_number)
    }

    fn code(&self, key: &str) -> Option<u8> {
        self.number(key)
            .filter(|n| n.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(n))
            .map(|n| n as u8)
    }
}

/// The portal mixes JSON numbers and numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn record(id: u64, name: &str) -> DeviceRecord {
        serde_json::from_value(json!({"DeviceID": id, "Name": name, "IsAlive": true})).unwrap()
    }

    fn delta(value: Value) -> SnapshotDelta {
        SnapshotDelta::from(value.as_object().unwrap().clone())
    }

    #[test]
    fn typed_getters_project_snapshot() {
        let device = Device::from_record(&record(7, "Hallway"));
        device.apply_delta(delta(json!({
            "DispTemperature": 70.5,
            "HeatSetpoint": "68",
            "CoolSetpoint": 76,
            "SystemSwitchPosition": 1,
            "fanMode": 2,
            "DisplayUnits": "F",
            "IndoorHumidity": 41,
            "IndoorHumiditySensorAvailable": true,
            "OutdoorTemperature": 128,
            "OutdoorTemperatureAvailable": false
        })));

        assert_eq!(device.indoor_temperature(), Some(70.5));
        assert_eq!(device.heat_setpoint(), Some(68.0));
        assert_eq!(device.cool_setpoint(), Some(76.0));
        assert_eq!(device.system_mode(), Some(SystemMode::Heat));
        assert_eq!(device.fan_mode(), Some(FanMode::Circulate));
        assert_eq!(device.display_units(), Some(DisplayUnits::Fahrenheit));
        assert_eq!(device.indoor_humidity(), Some(41.0));
        assert_eq!(device.outdoor_temperature(), None);
        assert!(device.last_updated().is_some());
    }

    #[test]
    fn unknown_mode_codes_are_none() {
        let device = Device::from_record(&record(7, "Hallway"));
        device.apply_delta(delta(json!({"SystemSwitchPosition": 9, "fanMode": 1.5})));
        assert_eq!(device.system_mode(), None);
        assert_eq!(device.fan_mode(), None);
    }

    #[test]
    fn delta_merges_over_existing_fields() {
        let device = Device::from_record(&record(7, "Hallway"));
        device.apply_delta(delta(json!({"A": 1, "B": 2})));
        device.apply_delta(SnapshotDelta {
            device_live: Some(false),
            ..delta(json!({"B": 3}))
        });

        let snap = device.snapshot();
        assert_eq!(snap["A"], 1);
        assert_eq!(snap["B"], 3);
        assert!(!device.is_alive());
    }

    #[test]
    fn apply_record_keeps_snapshot() {
        let device = Device::from_record(&record(7, "Hallway"));
        device.apply_delta(delta(json!({"DispTemperature": 70})));
        device.apply_record(&record(7, "Upstairs hallway"));
        assert_eq!(device.name(), "Upstairs hallway");
        assert_eq!(device.indoor_temperature(), Some(70.0));
    }

    #[test]
    fn modes_parse_case_insensitively() {
        assert_eq!("Cool".parse::<SystemMode>().unwrap(), SystemMode::Cool);
        assert_eq!(
            "emergency_heat".parse::<SystemMode>().unwrap(),
            SystemMode::EmergencyHeat
        );
        assert_eq!("follow_schedule".parse::<FanMode>().unwrap(), FanMode::FollowSchedule);
        assert_eq!(SystemMode::Auto.to_string(), "auto");
        assert_eq!(SystemMode::Auto.code(), 4);
    }
}
