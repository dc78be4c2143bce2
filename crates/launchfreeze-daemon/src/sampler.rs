//! CPU availability samples from `sysinfo`.

use launchfreeze_core::{
    CpuAvailabilityInfo, CpuAvailabilityListener, CpuAvailabilitySource, CpuMonitoringConfig,
    CpuSet, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, info};

/// Samples per-core usage on a background thread and reports the average
/// idle share of the watched cores to each subscriber.
pub struct SysinfoCpuSource {
    interval: Duration,
    background_cores: Vec<usize>,
    stop: Arc<AtomicBool>,
}

impl SysinfoCpuSource {
    pub fn new(interval: Duration, background_cores: Vec<usize>) -> Self {
        Self {
            interval,
            background_cores,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    fn cores_for(&self, cpuset: CpuSet) -> Vec<usize> {
        match cpuset {
            CpuSet::All => Vec::new(),
            CpuSet::Background => self.background_cores.clone(),
        }
    }
}

impl CpuAvailabilitySource for SysinfoCpuSource {
    fn subscribe(
        &self,
        config: CpuMonitoringConfig,
        listener: Arc<dyn CpuAvailabilityListener>,
    ) -> Result<()> {
        let interval = self.interval;
        let cores = self.cores_for(config.cpuset);
        let stop = self.stop.clone();

        info!(
            "CPU sampler subscribed: cpuset={:?}, cores={:?}, interval={:?}",
            config.cpuset, cores, interval
        );

        thread::Builder::new()
            .name("cpu-sampler".to_string())
            .spawn(move || {
                let mut system = System::new();
                system.refresh_cpu();
                listener.on_monitoring_interval_changed(interval);

                while !stop.load(Ordering::Relaxed) {
                    thread::sleep(interval);
                    system.refresh_cpu();

                    let usages: Vec<f32> = system.cpus().iter().map(|c| c.cpu_usage()).collect();
                    let available = availability_percent(&usages, &cores);
                    debug!("CPU availability {}% on {:?}", available, config.cpuset);

                    listener.on_availability_changed(CpuAvailabilityInfo {
                        cpuset: config.cpuset,
                        latest_avg_availability_percent: available,
                    });
                }
            })?;

        Ok(())
    }
}

impl Drop for SysinfoCpuSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Average idle percentage of `cores` (every core when empty). Indices past
/// the last core are ignored; with nothing left to average the CPU counts as
/// fully available.
pub fn availability_percent(usages: &[f32], cores: &[usize]) -> u32 {
    let selected: Vec<f32> = if cores.is_empty() {
        usages.to_vec()
    } else {
        cores.iter().filter_map(|&i| usages.get(i).copied()).collect()
    };

    if selected.is_empty() {
        return 100;
    }

    let usage = selected.iter().sum::<f32>() / selected.len() as f32;
    (100.0 - usage.clamp(0.0, 100.0)).round() as u32
}
