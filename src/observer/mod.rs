pub mod commands;
pub mod controller;
pub mod state;

pub use controller::{ControlCommand, ControllerHandle, MutationController};
pub use state::{ControllerSnapshot, ControllerStatus, ScanOutcome, ScanSnapshot};
