//! Description of the machine the helper runs on, used as agent context.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatingSystem {
    pub kind: String,
    pub platform: String,
    pub arch: String,
    pub version: String,
    pub kernel: String,
    pub hostname: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Processor {
    pub model: String,
    pub cpu_count: usize,
    /// Average frequency in MHz
    pub speed_mhz: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Memory {
    pub total: String,
    pub free: String,
    pub used: String,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Storage {
    pub home_dir: String,
    pub tmp_dir: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Session {
    pub uptime: String,
    pub user: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostDescription {
    pub os: OperatingSystem,
    pub cpu: Processor,
    pub memory: Memory,
    pub storage: Storage,
    pub session: Session,
}

impl HostDescription {
    /// Render as a plain-text context block for the agent.
    pub fn to_context(&self) -> String {
        format!(
            "SYSTEM CONTEXT (always use this information):\n\n\
             Operating system:\n- Type: {}\n- Platform: {}\n- Architecture: {}\n- Version: {}\n- Kernel: {}\n- Hostname: {}\n\n\
             Processor:\n- Model: {}\n- CPUs: {}\n- Speed: {} MHz\n\n\
             Memory:\n- Total: {}\n- Free: {}\n- Used: {} ({}%)\n\n\
             Storage:\n- Home: {}\n- Temp: {}\n\n\
             Session:\n- User: {}\n- Uptime: {}\n- Primary IP: {}\n\n\
             Use this information to write commands and scripts that fit this machine.",
            self.os.kind,
            self.os.platform,
            self.os.arch,
            self.os.version,
            self.os.kernel,
            self.os.hostname,
            self.cpu.model,
            self.cpu.cpu_count,
            self.cpu.speed_mhz,
            self.memory.total,
            self.memory.free,
            self.memory.used,
            self.memory.used_percent,
            self.storage.home_dir,
            self.storage.tmp_dir,
            self.session.user,
            self.session.uptime,
            self.session.ip_address,
        )
    }
}
