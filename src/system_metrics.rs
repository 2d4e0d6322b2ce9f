use sysinfo::{CpuExt, DiskExt, NetworkExt, System, SystemExt};

/// Point-in-time snapshot of host resource usage, used by the maintenance
/// loop both for display and for the ROM-cache memory-pressure check.
#[derive(Debug, Clone)]
pub struct SystemMetrics {
    pub cpu_percent: f32,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_percent: f32,
    pub disk_total_bytes: u64,
    pub disk_available_bytes: u64,
    pub network_received_bytes: u64,
    pub network_transmitted_bytes: u64,
}

impl SystemMetrics {
    /// Refreshes a `System` handle and takes a fresh snapshot. Callers that
    /// poll repeatedly should keep their own `System` around and call
    /// `from_system` instead, since `System::new_all` re-enumerates every
    /// process and disk on each call.
    pub fn snapshot() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self::from_system(&mut system)
    }

    pub fn from_system(system: &mut System) -> Self {
        system.refresh_cpu();
        system.refresh_memory();
        system.refresh_disks_list();
        system.refresh_disks();
        system.refresh_networks_list();
        system.refresh_networks();

        let cpu_percent = if system.cpus().is_empty() {
            0.0
        } else {
            system.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>() / system.cpus().len() as f32
        };

        let memory_total_bytes = system.total_memory();
        let memory_used_bytes = system.used_memory();
        let memory_percent = if memory_total_bytes > 0 {
            memory_used_bytes as f32 / memory_total_bytes as f32 * 100.0
        } else {
            0.0
        };

        let (disk_total_bytes, disk_available_bytes) = system
            .disks()
            .iter()
            .map(|d| (d.total_space(), d.available_space()))
            .fold((0u64, 0u64), |(t, a), (dt, da)| (t + dt, a + da));

        let (network_received_bytes, network_transmitted_bytes) = system
            .networks()
            .iter()
            .map(|(_, data)| (data.total_received(), data.total_transmitted()))
            .fold((0u64, 0u64), |(r, t), (dr, dt)| (r + dr, t + dt));

        SystemMetrics {
            cpu_percent,
            memory_total_bytes,
            memory_used_bytes,
            memory_percent,
            disk_total_bytes,
            disk_available_bytes,
            network_received_bytes,
            network_transmitted_bytes,
        }
    }

    /// `true` once used memory crosses 80%, the trigger the maintenance loop
    /// uses to drop every cached ROM rather than risk an allocator failure
    /// mid-build.
    pub fn memory_pressure_high(&self) -> bool {
        self.memory_percent >= 80.0
    }

    /// `true` when the memory still free is smaller than `avg_rom_size_bytes`,
    /// meaning there isn't room left to build even one more ROM.
    pub fn memory_too_low_for_rom(&self, avg_rom_size_bytes: u64) -> bool {
        let available = self.memory_total_bytes.saturating_sub(self.memory_used_bytes);
        available < avg_rom_size_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_pressure_is_flagged_at_the_80_percent_threshold() {
        let metrics = SystemMetrics {
            cpu_percent: 0.0,
            memory_total_bytes: 1_000,
            memory_used_bytes: 801,
            memory_percent: 80.1,
            disk_total_bytes: 0,
            disk_available_bytes: 0,
            network_received_bytes: 0,
            network_transmitted_bytes: 0,
        };
        assert!(metrics.memory_pressure_high());
    }

    #[test]
    fn low_headroom_is_flagged_against_average_rom_size() {
        let metrics = SystemMetrics {
            cpu_percent: 0.0,
            memory_total_bytes: 2_000,
            memory_used_bytes: 1_900,
            memory_percent: 95.0,
            disk_total_bytes: 0,
            disk_available_bytes: 0,
            network_received_bytes: 0,
            network_transmitted_bytes: 0,
        };
        assert!(metrics.memory_too_low_for_rom(200));
        assert!(!metrics.memory_too_low_for_rom(50));
    }
}
