use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// How the daemon's connection state is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StatusMethod {
    /// `status --json`, any peer online. Falls back to `Text` when the JSON is unusable.
    #[default]
    Json,
    /// Legacy heuristic over the human readable `status` output.
    Text,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    pub tailscale_path: String,
    /// Graphical elevation wrapper on Unix. `None` picks the platform default.
    pub escalation_tool: Option<String>,
    pub status_method: StatusMethod,
    pub connect_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub status_query_timeout_secs: u64,
    pub telemetry_interval_secs: u64,
    pub telemetry_join_timeout_secs: u64,
    pub service_start_delay_ms: u64,
    pub interface_pattern: String,
    pub sso_url_marker: String,
    /// Open any URL printed by a streamed command in the default browser.
    pub open_detected_urls: bool,
    pub auto_connect: bool,
    pub last_profile: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tailscale_path: "tailscale".to_string(),
            escalation_tool: None,
            status_method: StatusMethod::Json,
            connect_timeout_secs: 180,
            poll_interval_secs: 10,
            status_query_timeout_secs: 5,
            telemetry_interval_secs: 30,
            telemetry_join_timeout_secs: 5,
            service_start_delay_ms: 2000,
            interface_pattern: "tailscale".to_string(),
            sso_url_marker: "/a/".to_string(),
            open_detected_urls: true,
            auto_connect: false,
            last_profile: None,
        }
    }
}

impl Settings {
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Loads settings, falling back to defaults when the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_json::from_str(&content).map_err(anyhow::Error::from))
        {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("Failed to load settings from {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn status_query_timeout(&self) -> Duration {
        Duration::from_secs(self.status_query_timeout_secs)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_secs(self.telemetry_interval_secs)
    }

    pub fn telemetry_join_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_join_timeout_secs)
    }

    pub fn service_start_delay(&self) -> Duration {
        Duration::from_millis(self.service_start_delay_ms)
    }
}
