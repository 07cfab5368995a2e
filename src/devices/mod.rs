//! Device twins for the resources that make up the virtual power plant.

/// Ramp-limited power and energy model of one device.
pub mod resource;
pub mod types;

pub use resource::EnergyResource;
pub use types::{Direction, ResourceProperties};
