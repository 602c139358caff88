use std::path::PathBuf;

/// Returns the default socket path for the crewmux daemon.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("crewmux.sock")
    } else {
        // SAFETY: getuid() is always safe to call and has no preconditions
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/crewmux-{uid}.sock"))
    }
}

/// Returns the config directory path for crewmux.
pub fn dirs_path() -> PathBuf {
    if let Ok(config_dir) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(config_dir).join("crewmux")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".config").join("crewmux")
    } else {
        PathBuf::from("/tmp/crewmux")
    }
}

/// Returns the state directory holding the task tracker and schedule records.
pub fn state_dir() -> PathBuf {
    if let Ok(state) = std::env::var("XDG_STATE_HOME") {
        PathBuf::from(state).join("crewmux")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".local").join("state").join("crewmux")
    } else {
        PathBuf::from("/tmp/crewmux-state")
    }
}

/// Returns the config file path for the crewmux daemon.
pub fn config_path() -> PathBuf {
    dirs_path().join("config.toml")
}
