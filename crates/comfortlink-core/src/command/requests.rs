// ── Typed request payloads for Command variants ──

use serde::{Deserialize, Serialize};

/// How long a setpoint change holds before the schedule resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldMode {
    /// Until the next schedule period.
    #[default]
    Temporary,
    /// Until cancelled.
    Permanent,
}

impl HoldMode {
    /// Portal `StatusHeat` / `StatusCool` code.
    pub(crate) fn status_code(self) -> u8 {
        match self {
            Self::Temporary => 1,
            Self::Permanent => 2,
        }
    }
}

/// Heat and/or cool setpoint change, in the device's display units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SetpointRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cool: Option<f64>,
    #[serde(default)]
    pub hold: HoldMode,
}
