use std::sync::atomic::{AtomicU64, Ordering};

use crate::{
    monitoring::{Cpu, Memory, PlayerStats},
    player::{Player, PlaybackStatus},
};

pub fn collect_stats(player: &Player) -> PlayerStats {
    let sessions = player.sessions().all();

    // A session whose state is locked right now is counted as not playing.
    let playing_sessions = sessions
        .iter()
        .filter(|s| s.try_status() == Some(PlaybackStatus::Playing))
        .count();

    let (mem_used, mem_free, mem_total) = read_memory_stats();

    let cores = num_cpus();
    let system_load = read_system_load();
    let process_load = (read_process_cpu_load() / cores as f64).clamp(0.0, 1.0);

    PlayerStats {
        uptime_ms: player.uptime_ms(),
        sessions: sessions.len(),
        playing_sessions,
        nodes: player.pool().len(),
        max_nodes: player.pool().max_nodes(),
        extractors: player.extractors().len(),
        memory: Memory {
            free: mem_free,
            used: mem_used,
            allocated: mem_used,
            reservable: mem_total,
        },
        cpu: Cpu {
            cores,
            system_load,
            process_load,
        },
    }
}

/// Resident set size of this process in bytes, or 0 off Linux.
pub fn process_rss_bytes() -> u64 {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| {
            s.lines()
                .find(|l| l.starts_with("VmRSS:"))
                .and_then(|l| meminfo_kb(l))
                .map(|kb| kb * 1024)
        })
        .unwrap_or(0)
}

fn meminfo_kb(line: &str) -> Option<u64> {
    line.split_whitespace().nth(1).and_then(|v| v.parse::<u64>().ok())
}

fn read_system_load() -> f64 {
    static PREV_IDLE: AtomicU64 = AtomicU64::new(0);
    static PREV_TOTAL: AtomicU64 = AtomicU64::new(0);

    let stat = match std::fs::read_to_string("/proc/stat") {
        Ok(s) => s,
        Err(_) => return 0.0,
    };

    let first_line = stat.lines().next().unwrap_or("");
    let parts: Vec<&str> = first_line.split_whitespace().collect();
    if parts.len() < 5 || parts[0] != "cpu" {
        return 0.0;
    }

    let total: u64 = parts[1..].iter().map(|p| p.parse::<u64>().unwrap_or(0)).sum();
    let idle = parts[4].parse::<u64>().unwrap_or(0);

    let prev_idle = PREV_IDLE.swap(idle, Ordering::Relaxed);
    let prev_total = PREV_TOTAL.swap(total, Ordering::Relaxed);
    if prev_total == 0 {
        return 0.0;
    }

    let d_idle = idle.saturating_sub(prev_idle);
    let d_total = total.saturating_sub(prev_total);
    if d_total == 0 {
        return 0.0;
    }

    d_total.saturating_sub(d_idle) as f64 / d_total as f64
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// (rss, available, total) in bytes.
fn read_memory_stats() -> (u64, u64, u64) {
    let rss = process_rss_bytes();

    let (mut total, mut free) = (0u64, 0u64);
    if let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") {
        for line in meminfo.lines() {
            if line.starts_with("MemTotal:") {
                total = meminfo_kb(line).unwrap_or(0) * 1024;
            } else if line.starts_with("MemAvailable:") {
                free = meminfo_kb(line).unwrap_or(0) * 1024;
            }
        }
    }
    (rss, free, total)
}

/// Fraction of one core used by this process since the previous call.
///
/// `/proc/self/stat` counts in USER_HZ, which is 100 on every Linux build.
fn read_process_cpu_load() -> f64 {
    static PREV_CPU: AtomicU64 = AtomicU64::new(0);
    static PREV_WALL: AtomicU64 = AtomicU64::new(0);
    const USER_HZ: u64 = 100;

    let stat = match std::fs::read_to_string("/proc/self/stat") {
        Ok(s) => s,
        Err(_) => return 0.0,
    };
    // The command name may contain spaces; fields are read after its ')'.
    let after_comm = match stat.rfind(')') {
        Some(i) => &stat[i + 1..],
        None => return 0.0,
    };

    let fields: Vec<&str> = after_comm.split_whitespace().collect();
    let utime: u64 = fields.get(11).and_then(|v| v.parse().ok()).unwrap_or(0);
    let stime: u64 = fields.get(12).and_then(|v| v.parse().ok()).unwrap_or(0);
    let cpu_ticks = utime + stime;

    let uptime_sec: f64 = std::fs::read_to_string("/proc/uptime")
        .ok()
        .and_then(|s| s.split_whitespace().next().and_then(|v| v.parse().ok()))
        .unwrap_or(0.0);
    let wall_ticks = (uptime_sec * USER_HZ as f64) as u64;

    let prev_cpu = PREV_CPU.swap(cpu_ticks, Ordering::Relaxed);
    let prev_wall = PREV_WALL.swap(wall_ticks, Ordering::Relaxed);
    if prev_wall == 0 {
        return 0.0;
    }

    let d_cpu = cpu_ticks.saturating_sub(prev_cpu) as f64;
    let d_wall = wall_ticks.saturating_sub(prev_wall) as f64;
    if d_wall == 0.0 {
        return 0.0;
    }

    d_cpu / d_wall
}
