pub mod controller;
pub mod delivery;
pub mod http;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod telegram;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{Controller, ControllerSettings, RequestOutcome};
