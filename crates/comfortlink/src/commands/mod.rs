//! Command dispatch: bridges CLI args -> engine calls -> output formatting.

pub mod check;
pub mod config_cmd;
pub mod devices;
pub mod set;
pub mod watch;

use comfortlink_core::{CycleOutcome, Engine, PollResult};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a portal-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Check => check::handle(engine, global).await,
        Command::Devices => devices::list(engine, global).await,
        Command::Device { device } => devices::show(engine, device, global).await,
        Command::Watch => watch::handle(engine, global).await,
        Command::Set(args) => set::handle(engine, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

/// Run one poll cycle and turn a failed cycle into the matching error.
pub async fn poll(engine: &Engine) -> Result<(), CliError> {
    let result = engine.poll_now().await?;
    cycle_error(&result).map_or(Ok(()), Err)
}

fn cycle_error(result: &PollResult) -> Option<CliError> {
    let message = || {
        result
            .error
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| result.failed.first().map(|(_, e)| e.to_string()))
            .unwrap_or_else(|| "poll cycle failed".into())
    };
    match result.outcome {
        CycleOutcome::Online => None,
        CycleOutcome::AuthenticationFailed => Some(CliError::AuthFailed { message: message() }),
        CycleOutcome::RateLimited { retry_after } => Some(CliError::RateLimited {
            seconds: retry_after.as_secs(),
        }),
        CycleOutcome::SessionExpired | CycleOutcome::Offline => {
            Some(CliError::ConnectionFailed { message: message() })
        }
    }
}
