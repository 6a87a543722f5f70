pub mod service;
pub mod state;

pub use service::{LivenessMonitor, ScanReport};
pub use state::{AlertAction, AlertState, Assessment, LivenessPolicy};
