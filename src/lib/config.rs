use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::lib::containers::{manager::ManagerSettings, types::ContainerLimits};

#[derive(Debug, Clone, Parser)]
#[command(name = "code-runner", version)]
#[command(about = "Runs uploaded code submissions in throwaway Docker containers")]
pub struct Config {
    /// Address of the HTTP intake API
    #[arg(long, env = "CODE_RUNNER_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Holds uploaded artifacts, run directories and the database
    #[arg(long, env = "CODE_RUNNER_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    #[arg(long, env = "CODE_RUNNER_TICK_INTERVAL_SECS", default_value_t = 5)]
    pub tick_interval_secs: u64,

    #[arg(long, env = "CODE_RUNNER_MONITOR_INTERVAL_SECS", default_value_t = 10)]
    pub monitor_interval_secs: u64,

    /// Wall-clock limit of a single execution
    #[arg(long, env = "CODE_RUNNER_EXECUTION_TIMEOUT_SECS", default_value_t = 60)]
    pub execution_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping a container
    #[arg(long, env = "CODE_RUNNER_STOP_GRACE_SECS", default_value_t = 10)]
    pub stop_grace_secs: u64,

    /// CPUs kept free for the host
    #[arg(long, env = "CODE_RUNNER_RESERVED_CPUS", default_value_t = 2)]
    pub reserved_cpus: usize,

    #[arg(long, env = "CODE_RUNNER_MEMORY_LIMIT_MB", default_value_t = 256)]
    pub memory_limit_mb: u64,

    #[arg(long, env = "CODE_RUNNER_CPU_LIMIT", default_value_t = 1.0)]
    pub cpu_limit: f64,

    /// Start without pulling language images
    #[arg(long, env = "CODE_RUNNER_SKIP_IMAGE_PULL")]
    pub skip_image_pull: bool,
}

impl Config {
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("code_runner.db")
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            execution_timeout: Duration::from_secs(self.execution_timeout_secs),
            stop_grace: Duration::from_secs(self.stop_grace_secs),
            limits: ContainerLimits::new(self.memory_limit_mb, self.cpu_limit),
        }
    }
}
