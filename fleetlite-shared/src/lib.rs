//! Types shared between the fleetlite library and its tooling.

pub mod constants;
pub mod errors;

pub use errors::{FleetError, FleetResult};
