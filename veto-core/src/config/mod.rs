//! Constants and default locations.

pub mod constants;
pub mod defaults;
