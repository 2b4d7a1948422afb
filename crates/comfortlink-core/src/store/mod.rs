// ── Inventory storage ──
//
// The account's locations and devices as of the last inventory fetch,
// plus the detail snapshots merged into each device since.

mod inventory;

pub use inventory::{InventoryCache, SnapshotDelta};
