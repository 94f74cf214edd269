use std::env;
use std::path::{Path, PathBuf};

use crate::error::VpnError;

/// Platform-relative path from the home directory to the tsvpn base directory.
#[cfg(target_os = "linux")]
const BASE_SUBPATH: &str = ".local/share/tsvpn";

#[cfg(target_os = "macos")]
const BASE_SUBPATH: &str = "Library/Application Support/tsvpn";

#[cfg(target_os = "windows")]
const BASE_SUBPATH: &str = "AppData/Roaming/tsvpn";

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const BASE_SUBPATH: &str = ".tsvpn";

/// Overrides the base directory (used by tests and portable installs).
pub const HOME_OVERRIDE_ENV: &str = "TSVPN_HOME";

/// Every on-disk location used by the application, derived from one base directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base: PathBuf,
    /// Per-profile directories live here.
    pub data: PathBuf,
    pub log: PathBuf,
}

impl AppPaths {
    /// Resolves the platform-appropriate base directory.
    ///
    /// - **Linux:** `~/.local/share/tsvpn`
    /// - **macOS:** `~/Library/Application Support/tsvpn`
    /// - **Windows:** `%USERPROFILE%\AppData\Roaming\tsvpn`
    ///
    /// `TSVPN_HOME` takes precedence when set.
    pub fn resolve() -> Result<Self, VpnError> {
        if let Ok(custom) = env::var(HOME_OVERRIDE_ENV) {
            if !custom.trim().is_empty() {
                return Ok(Self::with_base(custom.trim()));
            }
        }

        let home_dir = env::var("HOME")
            .or_else(|_| env::var("USERPROFILE"))
            .map_err(|_| VpnError::Storage {
                message: "Neither HOME nor USERPROFILE is set".to_string(),
            })?;
        Ok(Self::with_base(PathBuf::from(home_dir).join(BASE_SUBPATH)))
    }

    pub fn with_base(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref().to_path_buf();
        Self {
            data: base.join("data"),
            log: base.join("log"),
            base,
        }
    }

    /// Creates the data and log directories if they do not exist yet.
    pub fn ensure(&self) -> Result<(), VpnError> {
        for dir in [&self.data, &self.log] {
            if !dir.exists() {
                std::fs::create_dir_all(dir)?;
                log::info!("Created directory: {:?}", dir);
            }
        }
        Ok(())
    }

    pub fn lock_file(&self) -> PathBuf {
        self.base.join("app.lock")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base.join("settings.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log.join("app_log.txt")
    }

    pub fn traffic_db(&self) -> PathBuf {
        self.base.join("traffic_stats.db")
    }
}

/// Replaces every `--auth-key=<value>` argument with a masked placeholder.
pub fn mask_command(argv: &[String]) -> String {
    argv.iter()
        .map(|part| {
            if part.starts_with("--auth-key=") {
                "--auth-key=****"
            } else {
                part.as_str()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_hang_off_the_base_directory() {
        let paths = AppPaths::with_base("/tmp/tsvpn-test");
        assert_eq!(paths.data, PathBuf::from("/tmp/tsvpn-test/data"));
        assert_eq!(paths.lock_file(), PathBuf::from("/tmp/tsvpn-test/app.lock"));
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/tmp/tsvpn-test/log/app_log.txt")
        );
    }

    #[test]
    fn mask_command_hides_the_auth_key() {
        let argv: Vec<String> = [
            "tailscale",
            "up",
            "--auth-key=tskey-secret",
            "--login-server=https://hs.example.com",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let shown = mask_command(&argv);
        assert!(!shown.contains("tskey-secret"));
        assert!(shown.contains("--auth-key=****"));
        assert!(shown.contains("--login-server=https://hs.example.com"));
    }
}
