//! CPU and resident-memory readings for a running child.
//!
//! Linux reads `/proc/<pid>/stat` and `/proc/<pid>/statm`. Elsewhere every
//! reading is zero; the timeline is still recorded.

use std::time::Instant;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Reading {
    pub cpu_percent: f64,
    pub rss_mb: f64,
}

#[derive(Debug)]
pub struct ResourceProbe {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    pid: u32,
    last: Option<(Instant, u64)>,
}

impl ResourceProbe {
    pub fn new(pid: u32) -> Self {
        Self { pid, last: None }
    }

    /// CPU% is averaged since the previous call; the first call reports 0.
    pub fn read(&mut self) -> Reading {
        let now = Instant::now();
        let Some(ticks) = self.cpu_ticks() else {
            return Reading::default();
        };
        let cpu_percent = match self.last {
            Some((prev_at, prev_ticks)) => {
                let wall = now.duration_since(prev_at).as_secs_f64();
                let cpu = ticks.saturating_sub(prev_ticks) as f64 / clock_ticks_per_sec();
                if wall > 0.0 {
                    cpu / wall * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        self.last = Some((now, ticks));
        Reading {
            cpu_percent,
            rss_mb: self.rss_bytes().unwrap_or(0) as f64 / (1024.0 * 1024.0),
        }
    }

    #[cfg(target_os = "linux")]
    fn cpu_ticks(&self) -> Option<u64> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", self.pid)).ok()?;
        parse_stat_cpu_ticks(&stat)
    }

    #[cfg(not(target_os = "linux"))]
    fn cpu_ticks(&self) -> Option<u64> {
        None
    }

    #[cfg(target_os = "linux")]
    fn rss_bytes(&self) -> Option<u64> {
        let statm = std::fs::read_to_string(format!("/proc/{}/statm", self.pid)).ok()?;
        let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        Some(pages.saturating_mul(page_size()))
    }

    #[cfg(not(target_os = "linux"))]
    fn rss_bytes(&self) -> Option<u64> {
        None
    }
}

/// `utime + stime` from a `/proc/<pid>/stat` line.
pub fn parse_stat_cpu_ticks(stat: &str) -> Option<u64> {
    // comm may contain spaces and parens; fields resume after the last ')'.
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(unix)]
fn clock_ticks_per_sec() -> f64 {
    let v = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if v > 0 {
        v as f64
    } else {
        100.0
    }
}

#[cfg(not(unix))]
fn clock_ticks_per_sec() -> f64 {
    100.0
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if v > 0 {
        v as u64
    } else {
        4096
    }
}
