//! Polling engine between `comfortlink-api` and device consumers.
//!
//! - **[`Engine`]**: one instance per portal account. Owns the
//!   [`SessionClient`](comfortlink_api::SessionClient), the inventory cache,
//!   the consumer registry and the background tasks. [`Engine::start`]
//!   spawns the poll loop and the command processor; [`Engine::shutdown`]
//!   stops them and closes the session exactly once.
//!
//! - **[`InventoryCache`]**: locations and their devices as of the last
//!   successful inventory fetch. [`Device`] instances are long-lived and
//!   updated in place, so a held `Arc<Device>` always reads current data.
//!
//! - **[`PollScheduler`]**: the poll cycle (login, inventory, bounded
//!   concurrent detail fetches, dispatch), connection status and backoff.
//!
//! - **[`DeviceConsumerRegistry`]**: at most one consumer per device.
//!
//! - **[`Command`]**: typed control requests routed through an `mpsc`
//!   channel to the engine's command processor.

pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::requests::{HoldMode, SetpointRequest};
pub use command::{Command, CommandResult};
pub use config::{EngineConfig, PollSettings};
pub use engine::Engine;
pub use error::CoreError;
pub use model::{Device, DeviceId, DeviceState, DisplayUnits, FanMode, Location, LocationId, SystemMode};
pub use registry::{ConsumerError, DeviceConsumerRegistry, DispatchOutcome};
pub use scheduler::{CycleOutcome, PollResult, PollScheduler};
pub use status::{ConnectionStatus, OfflineReason};
pub use store::{InventoryCache, SnapshotDelta};
