use serde::{Serialize, ser::SerializeStruct};
use sysinfo::System;

use super::types::HostStats;

impl HostStats {
    pub fn free_slots(&self) -> usize {
        self.max_concurrency.saturating_sub(self.running_containers)
    }
}

impl Serialize for HostStats {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("HostStats", 6)?;
        state.serialize_field("hostname", &self.hostname)?;
        state.serialize_field("cpu_usage", &format!("{:.2}%", self.cpu_usage))?;
        state.serialize_field(
            "memory",
            &format!("{} / {} MB", self.used_memory_mb, self.total_memory_mb),
        )?;
        state.serialize_field("running_containers", &self.running_containers)?;
        state.serialize_field("max_concurrency", &self.max_concurrency)?;
        state.serialize_field("free_slots", &self.free_slots())?;
        state.end()
    }
}

/// `system` must have had its CPU and memory figures refreshed by the caller.
pub fn host_stats(system: &System, running_containers: usize, max_concurrency: usize) -> HostStats {
    HostStats {
        hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
        cpu_usage: system.global_cpu_usage(),
        used_memory_mb: system.used_memory() / 1024 / 1024,
        total_memory_mb: system.total_memory() / 1024 / 1024,
        running_containers,
        max_concurrency,
    }
}
