//! In-memory implementations used by unit tests

mod broadcast;
mod bus;

pub use broadcast::*;
pub use bus::*;
