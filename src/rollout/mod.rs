//! Rolling update reconciliation
//!
//! One tick walks every configured auto-scaling group through three stages:
//! classify members as outdated or updated ([`classify`]), work out how much
//! updated capacity is actually ready ([`readiness`]), then advance at most
//! one outdated instance by one legal step ([`engine`]). Durable phase
//! markers live on the node annotations declared in the crate root.

pub mod classify;
pub mod engine;
pub mod phase;
pub mod readiness;

pub use classify::{classify_instances, Classification};
pub use engine::{RollingUpdateHandler, RolloutOptions};
pub use phase::{RolloutMarkers, RolloutPhase};
pub use readiness::{evaluate_readiness, Readiness};
