use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crewmux_protocol::paths;

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "paths::default_socket_path")]
    pub socket_path: PathBuf,
    /// Directory holding the task tracker and schedule records.
    #[serde(default = "paths::state_dir")]
    pub state_dir: PathBuf,
    #[serde(default = "default_recovery_interval_secs")]
    pub recovery_interval_secs: u64,
    #[serde(default = "default_idle_grace_secs")]
    pub idle_grace_secs: u64,
    #[serde(default = "default_probe_timeout_ms")]
    pub default_probe_timeout_ms: u64,
}

impl ServerConfig {
    pub fn load() -> anyhow::Result<Self> {
        // Load from the config file when present, defaults otherwise.
        let config_path = paths::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn pid_file_path() -> PathBuf {
        paths::dirs_path().join("crewmux.pid")
    }

    pub fn tracker_path(&self) -> PathBuf {
        self.state_dir.join("tasks.json")
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.state_dir.join("schedules.json")
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    pub fn idle_grace(&self) -> Duration {
        Duration::from_secs(self.idle_grace_secs)
    }

    pub fn default_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.default_probe_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: paths::default_socket_path(),
            state_dir: paths::state_dir(),
            recovery_interval_secs: default_recovery_interval_secs(),
            idle_grace_secs: default_idle_grace_secs(),
            default_probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

fn default_recovery_interval_secs() -> u64 {
    300
}

fn default_idle_grace_secs() -> u64 {
    600
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}
