//! プロセス自身のリソース使用状況を観測する。
//! trend-server の `/api/health` が返す材料になる。

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, System};

/// リソースの使用状況
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub memory_usage_mb: u64,
    pub cpu_usage_percent: f32,
}

/// 自プロセスの状態を監視する
pub struct HealthMonitor {
    sys: System,
    pid: Pid,
}

impl HealthMonitor {
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        let pid = Pid::from(std::process::id() as usize);
        Self { sys, pid }
    }

    pub fn check(&mut self) -> ResourceStatus {
        // 自プロセスのみリフレッシュ
        self.sys.refresh_process(self.pid);

        let mut memory_usage_mb = 0;
        let mut cpu_usage_percent = 0.0;

        if let Some(process) = self.sys.process(self.pid) {
            memory_usage_mb = process.memory() / 1024 / 1024;
            cpu_usage_percent = process.cpu_usage();
        }

        ResourceStatus { memory_usage_mb, cpu_usage_percent }
    }
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_reports_own_process() {
        let mut monitor = HealthMonitor::new();
        let status = monitor.check();
        // 自プロセスのメモリは必ず計上される
        assert!(status.memory_usage_mb > 0);
    }
}
