// comfortlink-api: Async client for the Total Connect Comfort portal

pub mod auth;
pub mod cookie;
pub mod error;
pub mod portal;
pub mod transport;

pub use auth::{Credentials, SessionState};
pub use cookie::{Cookie, CookieJar};
pub use error::Error;
pub use portal::client::{RequestBody, RetryPolicy, SessionClient, SessionConfig};
pub use portal::models::{ControlChange, DeviceDetail, DeviceRecord, LatestData, LocationRecord};
pub use transport::{TlsMode, TransportConfig};
