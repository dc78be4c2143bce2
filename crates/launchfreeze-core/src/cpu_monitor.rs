//! CPU load gating.
//!
//! Samples arrive on the source's callback thread; the only shared state
//! they touch is one atomic flag read by the freeze sequencer.

use crate::config::{CpuLoadMonitorConfig, DEFAULT_CPU_USAGE_THRESHOLD};
use crate::error::Result;
use crate::platform::{
    CpuAvailabilityInfo, CpuAvailabilityListener, CpuAvailabilitySource, CpuMonitoringConfig,
};
use crate::types::CpuSet;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Thresholded view of CPU availability
pub struct CpuLoadMonitor {
    high_load: AtomicBool,
    subscribed: Mutex<bool>,
    availability_threshold: u32,
    cpuset: CpuSet,
}

impl CpuLoadMonitor {
    pub fn new(config: &CpuLoadMonitorConfig) -> Self {
        let availability_threshold = match 100u32.checked_sub(config.usage_threshold) {
            Some(threshold) => threshold,
            None => {
                warn!(
                    "{} is an invalid CPU usage threshold. The default {} will be used",
                    config.usage_threshold, DEFAULT_CPU_USAGE_THRESHOLD
                );
                100 - DEFAULT_CPU_USAGE_THRESHOLD
            }
        };

        match config.cpuset() {
            CpuSet::Background => debug!("Monitor the background CPU load"),
            CpuSet::All => debug!("Monitor the load of all CPUs"),
        }

        Self {
            high_load: AtomicBool::new(false),
            subscribed: Mutex::new(false),
            availability_threshold,
            cpuset: config.cpuset(),
        }
    }

    pub fn availability_threshold(&self) -> u32 {
        self.availability_threshold
    }

    pub fn cpuset(&self) -> CpuSet {
        self.cpuset
    }

    /// Subscribe to `source` once. Later calls return immediately after a
    /// successful subscription; a failed one is retried on the next call.
    pub fn start(self: &Arc<Self>, source: &dyn CpuAvailabilitySource) -> Result<()> {
        let mut subscribed = self.subscribed.lock();
        if *subscribed {
            return Ok(());
        }

        let config = CpuMonitoringConfig {
            cpuset: self.cpuset,
            threshold_percent: self.availability_threshold,
        };
        source.subscribe(config, Arc::clone(self) as Arc<dyn CpuAvailabilityListener>)?;
        *subscribed = true;

        info!(
            "CPU load monitor subscribed: cpuset={:?}, availability threshold={}%",
            self.cpuset, self.availability_threshold
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        *self.subscribed.lock()
    }

    /// Store the thresholded value of one sample; returns the new flag.
    pub fn record_sample(&self, info: &CpuAvailabilityInfo) -> bool {
        let available = info.latest_avg_availability_percent.min(100);
        let is_high_load = available < self.availability_threshold;
        debug!(
            "Current CPU usage is {}% and convert to {} load",
            100 - available,
            if is_high_load { "high" } else { "low" }
        );
        self.high_load.store(is_high_load, Ordering::Release);
        is_high_load
    }

    pub fn is_high_load(&self) -> bool {
        self.high_load.load(Ordering::Acquire)
    }
}

impl CpuAvailabilityListener for CpuLoadMonitor {
    fn on_availability_changed(&self, info: CpuAvailabilityInfo) {
        self.record_sample(&info);
    }

    fn on_monitoring_interval_changed(&self, interval: Duration) {
        debug!("CPU load monitor interval convert to {:?}", interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ManualCpuSource;

    fn monitor(usage_threshold: u32) -> Arc<CpuLoadMonitor> {
        Arc::new(CpuLoadMonitor::new(&CpuLoadMonitorConfig {
            enabled: true,
            usage_threshold,
            background_cpuset: true,
        }))
    }

    fn sample(percent: u32) -> CpuAvailabilityInfo {
        CpuAvailabilityInfo {
            cpuset: CpuSet::Background,
            latest_avg_availability_percent: percent,
        }
    }

    #[test]
    fn test_initial_state_is_low_load() {
        let monitor = monitor(60);
        assert!(!monitor.is_high_load());
        assert!(!monitor.is_started());
        assert_eq!(monitor.availability_threshold(), 40);
    }

    #[test]
    fn test_invalid_usage_threshold_falls_back() {
        let monitor = monitor(140);
        assert_eq!(monitor.availability_threshold(), 40);
    }

    #[test]
    fn test_record_sample_thresholds() {
        let monitor = monitor(60);

        assert!(monitor.record_sample(&sample(25)));
        assert!(monitor.is_high_load());

        // Exactly at the threshold is not high load
        assert!(!monitor.record_sample(&sample(40)));
        assert!(!monitor.is_high_load());

        assert!(!monitor.record_sample(&sample(90)));
    }

    #[test]
    fn test_start_is_idempotent() {
        let monitor = monitor(60);
        let source = ManualCpuSource::new();

        monitor.start(&source).unwrap();
        monitor.start(&source).unwrap();

        assert!(monitor.is_started());
        assert_eq!(source.subscription_count(), 1);
        let config = source.last_config().unwrap();
        assert_eq!(config.threshold_percent, 40);
        assert_eq!(config.cpuset, CpuSet::Background);
    }

    #[test]
    fn test_samples_flow_through_subscription() {
        let monitor = monitor(60);
        let source = ManualCpuSource::new();
        monitor.start(&source).unwrap();

        source.push(10);
        assert!(monitor.is_high_load());

        source.push(80);
        assert!(!monitor.is_high_load());
    }

    #[test]
    fn test_unavailable_source_keeps_flag() {
        let monitor = monitor(60);
        let source = ManualCpuSource::unavailable();

        assert!(monitor.start(&source).is_err());
        assert!(!monitor.is_started());
        assert!(!monitor.is_high_load());
    }
}
