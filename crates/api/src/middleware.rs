//! Request admission layers for the reaction endpoint.
//!
//! Order on `/`: [`throttle`] (shared GCRA quota) runs first, then
//! [`request_gate`] (origin and referrer). The per-method quotas are applied by
//! the handlers once the gate has passed.

pub mod client_identity;
pub mod request_gate;
pub mod throttle;
