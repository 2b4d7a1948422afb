//! `set`: control commands against one thermostat.

use comfortlink_core::{Command as CoreCommand, Engine, HoldMode, SetpointRequest};

use crate::cli::{GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

/// Translate flags into engine commands, in mode, setpoint, fan order.
fn commands_for(args: &SetArgs) -> Vec<CoreCommand> {
    let device_id = args.device;
    let mut cmds = Vec::new();

    if let Some(mode) = args.mode {
        cmds.push(CoreCommand::SetSystemMode { device_id, mode });
    }
    if args.resume {
        cmds.push(CoreCommand::CancelHold { device_id });
    } else if args.heat.is_some() || args.cool.is_some() {
        cmds.push(CoreCommand::SetSetpoints {
            device_id,
            request: SetpointRequest {
                heat: args.heat,
                cool: args.cool,
                hold: if args.permanent {
                    HoldMode::Permanent
                } else {
                    HoldMode::Temporary
                },
            },
        });
    }
    if let Some(mode) = args.fan {
        cmds.push(CoreCommand::SetFanMode { device_id, mode });
    }
    cmds
}

pub async fn handle(engine: &Engine, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cmds = commands_for(&args);
    if cmds.is_empty() {
        return Err(CliError::Validation {
            field: "set".into(),
            reason: "nothing to change; pass --mode, --heat, --cool, --fan or --resume".into(),
        });
    }

    // Commands target devices known to the inventory.
    super::poll(engine).await?;

    for cmd in cmds {
        tracing::debug!(command = ?cmd, "executing");
        engine.execute(cmd).await?;
    }

    output::print_output(&format!("Updated device {}", args.device), global.quiet);
    Ok(())
}
