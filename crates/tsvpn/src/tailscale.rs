//! Command vectors for the `tailscale` CLI and the daemon's OS service.

use std::path::{Path, PathBuf};
use which::which;

/// Builds argument vectors for one `tailscale` executable.
#[derive(Debug, Clone)]
pub struct TailscaleCli {
    program: String,
}

impl TailscaleCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolves `configured` to a full path when possible. An unresolvable
    /// name is kept as is so the spawn error later names what was missing.
    pub fn locate(configured: &str) -> Self {
        match locate_tailscale(configured) {
            Some(path) => Self::new(path.to_string_lossy()),
            None => {
                log::warn!("Could not locate '{}'; relying on PATH at spawn time", configured);
                Self::new(configured)
            }
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn argv(&self, args: &[&str]) -> Vec<String> {
        std::iter::once(self.program.clone())
            .chain(args.iter().map(|a| a.to_string()))
            .collect()
    }

    /// `up --login-server=<url> [--auth-key=<key>] --accept-routes`
    pub fn up(&self, login_server: &str, auth_key: Option<&str>) -> Vec<String> {
        let login = format!("--login-server={}", login_server);
        let mut argv = self.argv(&["up", &login, "--accept-routes"]);
        if let Some(key) = auth_key {
            // Between the login server and --accept-routes.
            argv.insert(3, format!("--auth-key={}", key));
        }
        argv
    }

    pub fn status(&self) -> Vec<String> {
        self.argv(&["status"])
    }

    pub fn status_json(&self) -> Vec<String> {
        self.argv(&["status", "--json"])
    }

    pub fn logout(&self) -> Vec<String> {
        self.argv(&["logout"])
    }
}

/// Attempts to locate the `tailscale` executable.
///
/// Resolution order:
/// 1. `user_path` as a literal file path.
/// 2. `user_path` looked up via `PATH`.
/// 3. Platform-specific install locations.
pub fn locate_tailscale(user_path: &str) -> Option<PathBuf> {
    let candidate = Path::new(user_path);
    if candidate.is_file() {
        return Some(candidate.to_path_buf());
    }

    if let Ok(found) = which(user_path) {
        return Some(found);
    }

    platform_fallback()
}

#[cfg(unix)]
fn platform_fallback() -> Option<PathBuf> {
    let candidates = [
        "/usr/bin/tailscale",
        "/usr/local/bin/tailscale",
        "/opt/homebrew/bin/tailscale",
        "/Applications/Tailscale.app/Contents/MacOS/Tailscale",
    ];
    candidates.iter().map(PathBuf::from).find(|p| p.is_file())
}

#[cfg(windows)]
fn platform_fallback() -> Option<PathBuf> {
    let common = [
        "C:\\Program Files\\Tailscale\\tailscale.exe",
        "C:\\Program Files (x86)\\Tailscale\\tailscale.exe",
    ];
    common.iter().map(PathBuf::from).find(|p| p.is_file())
}

#[cfg(not(any(unix, windows)))]
fn platform_fallback() -> Option<PathBuf> {
    None
}

/// The elevated command that starts the daemon's OS service, if the platform has one.
pub fn service_start_command() -> Option<Vec<String>> {
    #[cfg(target_os = "linux")]
    return Some(vec![
        "systemctl".to_string(),
        "start".to_string(),
        "tailscaled".to_string(),
    ]);

    #[cfg(windows)]
    return Some(vec![
        "powershell".to_string(),
        "-Command".to_string(),
        "Start-Service Tailscale".to_string(),
    ]);

    #[cfg(not(any(target_os = "linux", windows)))]
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn up_without_key() {
        let cli = TailscaleCli::new("tailscale");
        assert_eq!(
            cli.up("https://hs.example.com", None),
            ["tailscale", "up", "--login-server=https://hs.example.com", "--accept-routes"]
        );
    }

    #[test]
    fn auth_key_follows_the_login_server() {
        let cli = TailscaleCli::new("tailscale");
        assert_eq!(
            cli.up("https://hs.example.com", Some("tskey-1")),
            [
                "tailscale",
                "up",
                "--login-server=https://hs.example.com",
                "--auth-key=tskey-1",
                "--accept-routes"
            ]
        );
    }

    #[test]
    fn status_and_logout() {
        let cli = TailscaleCli::new("/usr/bin/tailscale");
        assert_eq!(cli.status(), ["/usr/bin/tailscale", "status"]);
        assert_eq!(cli.status_json(), ["/usr/bin/tailscale", "status", "--json"]);
        assert_eq!(cli.logout(), ["/usr/bin/tailscale", "logout"]);
    }
}
