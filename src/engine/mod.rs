//! Session engine: countdown state machine plus the async controller that
//! drives it from a 1 Hz ticker and the sample-ingestion path.

mod controller;
mod state;

pub use controller::{SessionEngine, StartConfig};
pub use state::{EngineSnapshot, Phase};
