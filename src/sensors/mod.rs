pub mod service;

pub use service::{SensorSample, SensorService};
