// ── Domain model ──
//
// Identifiers, locations and long-lived devices with their latest
// snapshot. Devices are shared as `Arc<Device>` and updated in place.

pub mod device;
pub mod ids;
pub mod location;

pub use device::{Device, DeviceState, DisplayUnits, FanMode, SystemMode};
pub use ids::{DeviceId, LocationId};
pub use location::Location;
