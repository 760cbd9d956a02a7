//! Snapshot of the local machine for the agent's context.

use shared::host::{HostDescription, Memory, OperatingSystem, Processor, Session, Storage};
use std::net::UdpSocket;
use sysinfo::System;

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// Gather OS, CPU, memory, storage and session details.
pub fn describe_host() -> HostDescription {
    let mut sys = System::new_all();
    sys.refresh_memory();
    sys.refresh_cpu();

    let cpus = sys.cpus();
    let speed_mhz = if cpus.is_empty() {
        0
    } else {
        cpus.iter().map(|c| c.frequency()).sum::<u64>() / cpus.len() as u64
    };

    let total = sys.total_memory();
    let used = sys.used_memory();
    let used_percent = if total == 0 {
        0.0
    } else {
        (used as f64 / total as f64 * 10_000.0).round() / 100.0
    };

    HostDescription {
        os: OperatingSystem {
            kind: System::name().unwrap_or_else(|| std::env::consts::OS.to_string()),
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: System::long_os_version().unwrap_or_default(),
            kernel: System::kernel_version().unwrap_or_default(),
            hostname: System::host_name().unwrap_or_default(),
        },
        cpu: Processor {
            model: cpus
                .first()
                .map(|c| c.brand().trim().to_string())
                .unwrap_or_default(),
            cpu_count: cpus.len(),
            speed_mhz,
        },
        memory: Memory {
            total: format_bytes(total),
            free: format_bytes(sys.free_memory()),
            used: format_bytes(used),
            used_percent,
        },
        storage: Storage {
            home_dir: directories::BaseDirs::new()
                .map(|d| d.home_dir().display().to_string())
                .unwrap_or_default(),
            tmp_dir: std::env::temp_dir().display().to_string(),
        },
        session: Session {
            uptime: format_uptime(System::uptime()),
            user: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .unwrap_or_default(),
            ip_address: primary_ip().unwrap_or_else(|| "N/A".to_string()),
        },
    }
}

/// Address of the interface used for outbound traffic. Connecting a UDP
/// socket sends nothing.
fn primary_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let addr = socket.local_addr().ok()?.ip();
    if addr.is_unspecified() || addr.is_loopback() {
        None
    } else {
        Some(addr.to_string())
    }
}

/// Human-readable size with two decimals, in KB, MB or GB.
pub fn format_bytes(bytes: u64) -> String {
    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else {
        format!("{:.2} KB", b / KB)
    }
}

/// `1d 2h 3m`, `2h 3m` or `3m`.
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    if days > 0 {
        format!("{}d {}h {}m", days, hours, minutes)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}
