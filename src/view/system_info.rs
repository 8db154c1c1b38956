//! CPU, memory, disk and temperature sampling.
//!
//! CPU, memory, load and temperature come from `/proc` and `/sys`, disk
//! usage from `statvfs`. Every field is optional. Outside Linux only the
//! disk line is available, and non-Unix targets report nothing.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// One sample of host statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    /// CPU utilisation since the previous sample, percent.
    pub cpu_percent: Option<f32>,
    /// One minute load average.
    pub load_average: Option<f32>,
    /// Memory in use, MB.
    pub memory_used_mb: Option<u64>,
    /// Total memory, MB.
    pub memory_total_mb: Option<u64>,
    /// Disk space in use on the root filesystem, GB.
    pub disk_used_gb: Option<f32>,
    /// Root filesystem size, GB.
    pub disk_total_gb: Option<f32>,
    /// SoC temperature, degrees Celsius.
    pub temperature_c: Option<f32>,
}

impl SystemInfo {
    /// Overlay text, one entry per available statistic.
    pub fn lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(cpu) = self.cpu_percent {
            lines.push(format!("CPU: {:.1}%", cpu));
        }
        if let Some(load) = self.load_average {
            lines.push(format!("Load: {:.2}", load));
        }
        if let (Some(used), Some(total)) = (self.memory_used_mb, self.memory_total_mb) {
            let percent = if total > 0 {
                used as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            lines.push(format!("RAM: {}/{} MB ({:.1}%)", used, total, percent));
        }
        if let (Some(used), Some(total)) = (self.disk_used_gb, self.disk_total_gb) {
            let percent = if total > 0.0 { used / total * 100.0 } else { 0.0 };
            lines.push(format!("Disk: {:.1}/{:.1} GB ({:.1}%)", used, total, percent));
        }
        if let Some(temp) = self.temperature_c {
            lines.push(format!("Temp: {:.1} C", temp));
        }
        lines
    }
}

/// Throttled sampler. Files are read at most once per interval.
pub struct SystemMonitor {
    root: PathBuf,
    interval: Duration,
    last_sample: Option<Instant>,
    /// Previous `(idle, total)` jiffies for the CPU delta.
    cpu_prev: Option<(u64, u64)>,
    info: SystemInfo,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMonitor {
    pub fn new() -> Self {
        Self::with_root(Path::new("/"))
    }

    /// Read `proc/` and `sys/` below `root` instead of `/`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            interval: Duration::from_secs(1),
            last_sample: None,
            cpu_prev: None,
            info: SystemInfo::default(),
        }
    }

    /// Latest statistics, refreshed if the interval has elapsed.
    pub fn sample(&mut self) -> &SystemInfo {
        let now = Instant::now();
        let due = self
            .last_sample
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true);
        if due {
            self.refresh();
            self.last_sample = Some(now);
        }
        &self.info
    }

    fn read(&self, relative: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(relative)).ok()
    }

    fn refresh(&mut self) {
        let cpu_times = self.read("proc/stat").and_then(|s| parse_cpu_times(&s));
        let cpu_percent = match (self.cpu_prev, cpu_times) {
            (Some((idle0, total0)), Some((idle1, total1))) if total1 > total0 => {
                let busy = (total1 - total0).saturating_sub(idle1.saturating_sub(idle0));
                Some(busy as f32 / (total1 - total0) as f32 * 100.0)
            }
            _ => None,
        };
        if cpu_times.is_some() {
            self.cpu_prev = cpu_times;
        }

        let memory = self.read("proc/meminfo").and_then(|s| parse_meminfo(&s));
        let disk = disk_usage(&self.root);

        self.info = SystemInfo {
            cpu_percent,
            load_average: self.read("proc/loadavg").and_then(|s| parse_loadavg(&s)),
            memory_used_mb: memory.map(|(total, available)| total.saturating_sub(available) / 1024),
            memory_total_mb: memory.map(|(total, _)| total / 1024),
            disk_used_gb: disk.map(|(used, _)| bytes_to_gb(used)),
            disk_total_gb: disk.map(|(_, total)| bytes_to_gb(total)),
            temperature_c: self
                .read("sys/class/thermal/thermal_zone0/temp")
                .and_then(|s| parse_temperature(&s)),
        };
    }
}

fn bytes_to_gb(bytes: u64) -> f32 {
    (bytes as f64 / (1024.0 * 1024.0 * 1024.0)) as f32
}

/// `(used, total)` bytes of the filesystem holding `path`.
#[cfg(unix)]
fn disk_usage(path: &Path) -> Option<(u64, u64)> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stats = std::mem::MaybeUninit::<libc::statvfs>::uninit();
    // SAFETY: `c_path` is NUL terminated and `stats` is only read after a
    // successful call has filled it.
    let stats = unsafe {
        if libc::statvfs(c_path.as_ptr(), stats.as_mut_ptr()) != 0 {
            return None;
        }
        stats.assume_init()
    };

    let fragment = stats.f_frsize as u64;
    let total = (stats.f_blocks as u64).checked_mul(fragment)?;
    let free = (stats.f_bfree as u64).checked_mul(fragment)?;
    Some((total.saturating_sub(free), total))
}

#[cfg(not(unix))]
fn disk_usage(_path: &Path) -> Option<(u64, u64)> {
    None
}

/// `(idle, total)` jiffies from the aggregate `cpu` line of `/proc/stat`.
fn parse_cpu_times(stat: &str) -> Option<(u64, u64)> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|v| v.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = values[3] + values.get(4).copied().unwrap_or(0);
    Some((idle, values.iter().sum()))
}

/// `(MemTotal, MemAvailable)` in kB.
fn parse_meminfo(meminfo: &str) -> Option<(u64, u64)> {
    let field = |name: &str| {
        meminfo
            .lines()
            .find(|l| l.starts_with(name))
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|v| v.parse::<u64>().ok())
    };
    Some((field("MemTotal:")?, field("MemAvailable:")?))
}

fn parse_loadavg(loadavg: &str) -> Option<f32> {
    loadavg.split_whitespace().next()?.parse().ok()
}

/// Thermal zone value in millidegrees.
fn parse_temperature(raw: &str) -> Option<f32> {
    raw.trim().parse::<f32>().ok().map(|v| v / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_parse_cpu_times() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        assert_eq!(parse_cpu_times(stat), Some((850, 1000)));
        assert_eq!(parse_cpu_times("intr 1 2 3"), None);
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:        8000000 kB\nMemFree:  100 kB\nMemAvailable:    6000000 kB\n";
        assert_eq!(parse_meminfo(meminfo), Some((8_000_000, 6_000_000)));
        assert_eq!(parse_meminfo("MemTotal: 10 kB\n"), None);
    }

    #[test]
    fn test_parse_temperature_and_load() {
        assert_eq!(parse_temperature("48312\n"), Some(48.312));
        assert_eq!(parse_loadavg("0.42 0.30 0.25 1/123 4567\n"), Some(0.42));
    }

    #[test]
    fn test_monitor_reads_fake_root() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "proc/stat", "cpu  100 0 100 800 0 0 0 0\n");
        write(dir.path(), "proc/meminfo", "MemTotal: 2048000 kB\nMemAvailable: 1024000 kB\n");
        write(dir.path(), "proc/loadavg", "1.50 1.00 0.50 2/200 999\n");
        write(dir.path(), "sys/class/thermal/thermal_zone0/temp", "55000\n");

        let mut monitor = SystemMonitor::with_root(dir.path());
        let info = monitor.sample().clone();
        // First sample has no CPU delta yet
        assert_eq!(info.cpu_percent, None);
        assert_eq!(info.memory_total_mb, Some(2000));
        assert_eq!(info.memory_used_mb, Some(1000));
        assert_eq!(info.load_average, Some(1.5));
        assert_eq!(info.temperature_c, Some(55.0));

        let lines = info.lines();
        assert!(lines.iter().any(|l| l.starts_with("RAM: 1000/2000 MB")));
        assert!(lines.iter().any(|l| l == "Temp: 55.0 C"));
    }

    #[test]
    fn test_disk_line() {
        let info = SystemInfo {
            disk_used_gb: Some(12.5),
            disk_total_gb: Some(50.0),
            ..Default::default()
        };
        assert_eq!(info.lines(), vec!["Disk: 12.5/50.0 GB (25.0%)".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn test_disk_usage_of_existing_path() {
        let dir = tempfile::tempdir().unwrap();
        let (used, total) = disk_usage(dir.path()).unwrap();
        assert!(total > 0);
        assert!(used <= total);
        assert!(disk_usage(&dir.path().join("missing")).is_none());
    }

    #[test]
    fn test_cpu_percent_from_delta() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "proc/stat", "cpu  100 0 100 800 0 0 0 0\n");
        let mut monitor = SystemMonitor::with_root(dir.path());
        monitor.interval = Duration::ZERO;
        monitor.sample();

        // 100 busy and 100 idle jiffies since the first sample
        write(dir.path(), "proc/stat", "cpu  150 0 150 900 0 0 0 0\n");
        let cpu = monitor.sample().cpu_percent.unwrap();
        assert!((cpu - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_missing_files_leave_proc_fields_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = SystemMonitor::with_root(dir.path());
        let info = monitor.sample();
        assert_eq!(info.cpu_percent, None);
        assert_eq!(info.load_average, None);
        assert_eq!(info.memory_total_mb, None);
        assert_eq!(info.temperature_c, None);
        assert!(info.lines().iter().all(|l| l.starts_with("Disk: ")));
    }
}
