pub mod history;
pub mod latest;

pub use history::{AggregatedPoint, History, HistoryAggregator, HistoryPoint, Timescale};
pub use latest::{LatestReading, LatestResolver};
