// Portal API surface.
//
// `client` owns transport mechanics and session state; the remaining
// modules add endpoint methods on `SessionClient` as inherent impls.

pub mod auth;
pub mod client;
pub mod control;
pub mod locations;
pub mod models;
