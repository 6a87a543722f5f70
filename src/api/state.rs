use std::{sync::Arc, time::Duration};

use crate::{
    control::CommandQueue,
    monitor::{LivenessMonitor, LivenessPolicy},
    notify::Notifier,
    query::{HistoryAggregator, LatestResolver},
    sensors::SensorService,
    store::{DeviceRegistry, ReadingStore},
};

/// Shared handler state. Cheap to clone; every field shares its backing
/// store.
#[derive(Clone)]
pub struct AppState {
    pub sensors: SensorService,
    pub latest: LatestResolver,
    pub history: HistoryAggregator,
    pub commands: CommandQueue,
    pub monitor: Arc<LivenessMonitor>,
}

impl AppState {
    pub fn new(
        readings: Arc<dyn ReadingStore>,
        devices: Arc<dyn DeviceRegistry>,
        notifier: Arc<dyn Notifier>,
        policy: LivenessPolicy,
        monitor_interval: Duration,
    ) -> Self {
        Self {
            sensors: SensorService::new(readings.clone(), devices.clone()),
            latest: LatestResolver::new(readings.clone(), devices.clone()),
            history: HistoryAggregator::new(readings),
            commands: CommandQueue::new(),
            monitor: Arc::new(LivenessMonitor::new(devices, notifier, policy, monitor_interval)),
        }
    }
}
