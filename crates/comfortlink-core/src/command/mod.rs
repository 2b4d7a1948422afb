// ── Command API ──
//
// Every control operation flows through the `Command` enum. The engine
// routes each variant to a portal control submission over the same
// session the poll loop uses.

pub mod requests;

use comfortlink_api::ControlChange;

use crate::error::CoreError;
use crate::model::{DeviceId, FanMode, SystemMode};

pub use requests::{HoldMode, SetpointRequest};

/// Portal status code that returns a zone to its schedule.
const FOLLOW_SCHEDULE: u8 = 0;

/// A command envelope sent through the command channel.
/// Contains the command and a oneshot response channel.
pub(crate) struct CommandEnvelope {
    pub command: Command,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// All control operations against a thermostat.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetSystemMode {
        device_id: DeviceId,
        mode: SystemMode,
    },
    SetSetpoints {
        device_id: DeviceId,
        request: SetpointRequest,
    },
    SetFanMode {
        device_id: DeviceId,
        mode: FanMode,
    },
    /// Drop any hold and follow the schedule again.
    CancelHold {
        device_id: DeviceId,
    },
}

/// Result of a successfully submitted command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Ok,
}

impl Command {
    pub fn device_id(&self) -> DeviceId {
        match self {
            Self::SetSystemMode { device_id, .. }
            | Self::SetSetpoints { device_id, .. }
            | Self::SetFanMode { device_id, .. }
            | Self::CancelHold { device_id } => *device_id,
        }
    }

    /// Build the portal control body. Fields the command does not touch
    /// are left `None` and sent as `null`.
    pub(crate) fn to_control_change(&self) -> Result<ControlChange, CoreError> {
        let base = ControlChange::for_device(self.device_id().get());
        let change = match self {
            Self::SetSystemMode { mode, .. } => ControlChange {
                system_switch: Some(mode.code()),
                ..base
            },
            Self::SetSetpoints { request, .. } => {
                if request.heat.is_none() && request.cool.is_none() {
                    return Err(CoreError::ValidationFailed {
                        message: "a setpoint change needs a heat or cool value".into(),
                    });
                }
                for value in [request.heat, request.cool].into_iter().flatten() {
                    if !value.is_finite() {
                        return Err(CoreError::ValidationFailed {
                            message: format!("setpoint {value} is not a number"),
                        });
                    }
                }
                let status = request.hold.status_code();
                ControlChange {
                    heat_setpoint: request.heat,
                    cool_setpoint: request.cool,
                    status_heat: request.heat.map(|_| status),
                    status_cool: request.cool.map(|_| status),
                    ..base
                }
            }
            Self::SetFanMode { mode, .. } => ControlChange {
                fan_mode: Some(mode.code()),
                ..base
            },
            Self::CancelHold { .. } => ControlChange {
                status_heat: Some(FOLLOW_SCHEDULE),
                status_cool: Some(FOLLOW_SCHEDULE),
                ..base
            },
        };
        Ok(change)
    }
}
