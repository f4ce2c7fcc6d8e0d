use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System};
use tracing::warn;

/// Memory figures in kilobytes, as reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemInfo {
    pub mem_total: u64,
    pub mem_available: u64,
}

/// Disk figures in bytes for the root filesystem.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub all: u64,
    pub used: u64,
    pub free: u64,
}

/// Cumulative CPU jiffy counters. The scheduler differences two samples
/// taken a few seconds apart to derive a usage ratio.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuStat {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub io_wait: u64,
    pub irq: u64,
    pub soft_irq: u64,
    pub steal: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadAvg {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

/// A point-in-time sample of a worker host's resources, served on
/// `GET /stats` and consumed by the manager's scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub mem_stats: MemInfo,
    pub disk_stats: DiskInfo,
    pub cpu_stats: CpuStat,
    pub load_stats: LoadAvg,
}

impl Stats {
    pub fn mem_total_kb(&self) -> u64 {
        self.mem_stats.mem_total
    }

    pub fn mem_available_kb(&self) -> u64 {
        self.mem_stats.mem_available
    }

    pub fn mem_used_kb(&self) -> u64 {
        self.mem_stats.mem_total.saturating_sub(self.mem_stats.mem_available)
    }

    pub fn disk_total(&self) -> u64 {
        self.disk_stats.all
    }

    pub fn disk_free(&self) -> u64 {
        self.disk_stats.free
    }

    pub fn disk_used(&self) -> u64 {
        self.disk_stats.used
    }

    /// Usage ratio derived from a single cumulative sample:
    /// idle = idle + iowait, total = idle + user + nice + system + irq
    /// + softirq + steal, usage = (total - idle) / total. Zero when the
    /// counters are empty.
    pub fn cpu_usage(&self) -> f64 {
        let c = &self.cpu_stats;
        let idle = c.idle + c.io_wait;
        let non_idle = c.user + c.nice + c.system + c.irq + c.soft_irq + c.steal;
        let total = idle + non_idle;
        if total == 0 {
            return 0.0;
        }
        (total - idle) as f64 / total as f64
    }
}

/// Source of host samples for the worker's collect loop. A trait so
/// tests can feed canned figures.
pub trait StatsProvider: Send {
    fn sample(&mut self) -> Stats;
}

/// Provider backed by sysinfo for memory, disk and load, plus a direct
/// read of /proc/stat for the jiffy counters sysinfo does not expose.
pub struct SystemStatsProvider {
    sys: System,
}

impl SystemStatsProvider {
    pub fn new() -> Self {
        SystemStatsProvider {
            sys: System::new_all(),
        }
    }
}

impl Default for SystemStatsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsProvider for SystemStatsProvider {
    fn sample(&mut self) -> Stats {
        self.sys.refresh_memory();

        let mem_stats = MemInfo {
            mem_total: self.sys.total_memory() / 1024,
            mem_available: self.sys.available_memory() / 1024,
        };

        let disks = Disks::new_with_refreshed_list();
        let all: u64 = disks.iter().map(|d| d.total_space()).sum();
        let free: u64 = disks.iter().map(|d| d.available_space()).sum();
        let disk_stats = DiskInfo {
            all,
            free,
            used: all.saturating_sub(free),
        };

        let load = System::load_average();
        let load_stats = LoadAvg {
            one: load.one,
            five: load.five,
            fifteen: load.fifteen,
        };

        let cpu_stats = read_cpu_stat().unwrap_or_else(|| {
            warn!("unable to read /proc/stat, cpu counters zeroed");
            CpuStat::default()
        });

        Stats {
            mem_stats,
            disk_stats,
            cpu_stats,
            load_stats,
        }
    }
}

fn read_cpu_stat() -> Option<CpuStat> {
    let contents = std::fs::read_to_string("/proc/stat").ok()?;
    let line = contents.lines().find(|l| l.starts_with("cpu "))?;
    parse_cpu_line(line)
}

fn parse_cpu_line(line: &str) -> Option<CpuStat> {
    let mut fields = line.split_whitespace().skip(1);
    let mut next = || fields.next()?.parse::<u64>().ok();
    Some(CpuStat {
        user: next()?,
        nice: next()?,
        system: next()?,
        idle: next()?,
        io_wait: next()?,
        irq: next()?,
        soft_irq: next()?,
        steal: next()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_usage_zero_when_counters_empty() {
        let stats = Stats::default();
        assert_eq!(stats.cpu_usage(), 0.0);
    }

    #[test]
    fn cpu_usage_counts_iowait_as_idle() {
        let stats = Stats {
            cpu_stats: CpuStat {
                user: 30,
                system: 10,
                idle: 40,
                io_wait: 20,
                ..Default::default()
            },
            ..Default::default()
        };
        // idle = 60, total = 100
        assert!((stats.cpu_usage() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn mem_used_is_total_minus_available() {
        let stats = Stats {
            mem_stats: MemInfo {
                mem_total: 1000,
                mem_available: 400,
            },
            ..Default::default()
        };
        assert_eq!(stats.mem_used_kb(), 600);
    }

    #[test]
    fn parses_proc_stat_line() {
        let line = "cpu  4705 150 1120 16250 520 30 45 0 0 0";
        let cpu = parse_cpu_line(line).unwrap();
        assert_eq!(cpu.user, 4705);
        assert_eq!(cpu.nice, 150);
        assert_eq!(cpu.idle, 16250);
        assert_eq!(cpu.io_wait, 520);
        assert_eq!(cpu.steal, 0);
    }

    #[test]
    fn rejects_malformed_line() {
        assert!(parse_cpu_line("cpu  12 garbage").is_none());
    }
}
