//! Default paths for drivewatch components
//!
//! Paths are user-writable by default (no root required):
//! - Config: `$XDG_CONFIG_HOME/drivewatch/config.toml` or `~/.config/drivewatch/config.toml`
//! - Data: `$XDG_DATA_HOME/drivewatch` or `~/.local/share/drivewatch`
//!
//! The daemon also accepts `DRIVEWATCH_DATA_DIR` through its command line.

use std::path::PathBuf;

/// Application subdirectory name
const APP_DIR: &str = "drivewatch";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Database filename within the data directory
pub const DATABASE_FILENAME: &str = "drivewatch.db";

fn xdg_dir(var: &str, home_fallback: &[&str], last_resort: &str) -> PathBuf {
    if let Ok(dir) = std::env::var(var) {
        return PathBuf::from(dir).join(APP_DIR);
    }

    if let Ok(home) = std::env::var("HOME") {
        let mut path = PathBuf::from(home);
        for part in home_fallback {
            path.push(part);
        }
        return path.join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join(last_resort)
}

/// Get the default config file path.
pub fn default_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", &[".config"], "config").join(CONFIG_FILENAME)
}

/// Get the data directory without checking DRIVEWATCH_DATA_DIR env var.
/// Used for default values in configs where the env var is checked separately.
pub fn data_dir_without_env() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", &[".local", "share"], "data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_contains_drivewatch() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("drivewatch"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn data_dir_contains_drivewatch() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("drivewatch"));
    }
}
