//! System metrics collector
//!
//! CPU, memory and load come from `sysinfo`'s [`System`], temperatures from
//! its sensor [`Components`], and disk usage from the [`Disks`] entry whose
//! mount point holds the agent's data directory. Any source that cannot be
//! read is left out of the record.

use drivewatch_host_api::{HostError, HostResult, MetricsSource};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Components, Disks, System};
use tracing::debug;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

struct Sources {
    system: System,
    disks: Disks,
    components: Components,
    /// CPU usage is a delta, so the first refresh only primes it
    cpu_primed: bool,
}

pub struct SystemMetrics {
    disk_path: PathBuf,
    sources: Mutex<Sources>,
}

impl SystemMetrics {
    /// Collector reporting disk usage of the volume holding `disk_path`
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self {
            disk_path: disk_path.into(),
            sources: Mutex::new(Sources {
                system: System::new(),
                disks: Disks::new_with_refreshed_list(),
                components: Components::new_with_refreshed_list(),
                cpu_primed: false,
            }),
        }
    }
}

impl MetricsSource for SystemMetrics {
    fn collect(&self) -> HostResult<BTreeMap<String, f64>> {
        let mut guard = self
            .sources
            .lock()
            .map_err(|_| HostError::Internal("metrics sources poisoned".into()))?;
        let sources = &mut *guard;
        let mut metrics = BTreeMap::new();

        sources.system.refresh_cpu_usage();
        if sources.cpu_primed {
            metrics.insert(
                "cpu_usage_percent".into(),
                round2(sources.system.global_cpu_usage() as f64),
            );
        }
        sources.cpu_primed = true;

        let load = System::load_average();
        if load.one > 0.0 || load.five > 0.0 {
            metrics.insert("load_avg_1m".into(), round2(load.one));
        }

        sources.system.refresh_memory();
        let total = sources.system.total_memory();
        if total > 0 {
            let used = total.saturating_sub(sources.system.available_memory());
            metrics.insert("ram_usage_gb".into(), round2(used as f64 / BYTES_PER_GB));
            metrics.insert("ram_usage_percent".into(), percent(used, total));
        }

        sources.disks.refresh();
        let volumes = sources
            .disks
            .list()
            .iter()
            .map(|d| (d.mount_point(), d.total_space(), d.available_space()));
        match data_volume(volumes, &self.disk_path) {
            Some((total, available)) => {
                let used = total.saturating_sub(available);
                metrics.insert("disk_usage_gb".into(), round2(used as f64 / BYTES_PER_GB));
                metrics.insert("disk_usage_percent".into(), percent(used, total));
            }
            None => debug!(path = %self.disk_path.display(), "No disk holds the data directory"),
        }

        sources.components.refresh();
        let hottest = sources
            .components
            .list()
            .iter()
            .map(|c| c.temperature() as f64)
            .filter(|t| t.is_finite() && *t > 0.0)
            .reduce(f64::max);
        if let Some(temp) = hottest {
            metrics.insert("temperature_c".into(), round2(temp));
        }

        if metrics.is_empty() {
            return Err(HostError::Unsupported(
                "no system metrics readable on this host".into(),
            ));
        }
        Ok(metrics)
    }
}

/// Total and available bytes of the volume with the longest mount point
/// containing `path`
fn data_volume<'a>(
    volumes: impl Iterator<Item = (&'a Path, u64, u64)>,
    path: &Path,
) -> Option<(u64, u64)> {
    volumes
        .filter(|(mount, total, _)| *total > 0 && path.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
        .map(|(_, total, available)| (total, available))
}

fn percent(part: u64, whole: u64) -> f64 {
    round2(part as f64 * 100.0 / whole as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_volume_prefers_deepest_mount() {
        let volumes = [
            (Path::new("/"), 100, 40),
            (Path::new("/var/lib"), 50, 10),
            (Path::new("/var/lib/other"), 20, 5),
            (Path::new("/mnt/empty"), 0, 0),
        ];

        let pick = |p: &str| data_volume(volumes.iter().copied(), Path::new(p));
        assert_eq!(pick("/var/lib/drivewatch"), Some((50, 10)));
        assert_eq!(pick("/home/fleet"), Some((100, 40)));
        assert_eq!(pick("/var/lib/otherwise"), Some((50, 10)));
        assert_eq!(pick("/mnt/empty/data"), Some((100, 40)));
        assert_eq!(data_volume(std::iter::empty(), Path::new("/data")), None);
    }

    #[test]
    fn percent_rounds_to_two_places() {
        assert_eq!(percent(1, 3), 33.33);
        assert_eq!(percent(3, 4), 75.0);
    }

    #[test]
    fn cpu_is_reported_from_second_sample() {
        let dir = tempfile::TempDir::new().unwrap();
        let source = SystemMetrics::new(dir.path());

        let first = source.collect().unwrap();
        assert!(!first.contains_key("cpu_usage_percent"));
        assert!(first["ram_usage_percent"] > 0.0);
        assert!(first["ram_usage_percent"] <= 100.0);

        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        let second = source.collect().unwrap();
        let cpu = second["cpu_usage_percent"];
        assert!((0.0..=100.0).contains(&cpu));
    }
}
