//! Privilege elevation strategies.
//!
//! One strategy is selected at startup with [`select_elevation`] and shared by
//! every [`ProcessRunner`](super::ProcessRunner) call; call sites never branch
//! on the platform themselves.

use std::path::Path;
use std::sync::Arc;

/// The command line to spawn after elevation was applied.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub argv: Vec<String>,
    /// Advisory text for the user (e.g. which wrapper is used).
    pub notice: Option<String>,
    /// `true` when `argv[0]` is an elevation wrapper around the real command.
    pub wrapped: bool,
}

pub trait Elevation: Send + Sync {
    fn prepare(&self, argv: Vec<String>) -> Prepared;

    /// Returns `true` if `code` is the wrapper's "authorization refused" exit code.
    fn denied(&self, _code: i32) -> bool {
        false
    }

    fn describe(&self) -> String;
}

/// Returns the basename of a tool path (e.g. "/usr/bin/pkexec" → "pkexec").
fn tool_base_name(tool: &str) -> &str {
    Path::new(tool)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(tool)
}

/// Prefixes the command with a graphical elevation wrapper.
pub struct WrapperElevation {
    tool: String,
}

impl WrapperElevation {
    pub fn new(tool: impl Into<String>) -> Self {
        Self { tool: tool.into() }
    }
}

impl Elevation for WrapperElevation {
    fn prepare(&self, argv: Vec<String>) -> Prepared {
        let mut wrapped = Vec::with_capacity(argv.len() + 1);
        wrapped.push(self.tool.clone());
        wrapped.extend(argv);
        Prepared {
            argv: wrapped,
            notice: Some(format!(
                "Elevated command: using {}.",
                tool_base_name(&self.tool)
            )),
            wrapped: true,
        }
    }

    fn denied(&self, code: i32) -> bool {
        // pkexec: 126 = dialog dismissed, 127 = not authorized.
        tool_base_name(&self.tool) == "pkexec" && matches!(code, 126 | 127)
    }

    fn describe(&self) -> String {
        format!("wrapper ({})", self.tool)
    }
}

/// Elevation is assumed to be in effect for the whole process already; the
/// command runs as is and the user only gets an advisory notice.
pub struct AmbientElevation {
    notice: String,
}

impl AmbientElevation {
    pub fn new(notice: impl Into<String>) -> Self {
        Self {
            notice: notice.into(),
        }
    }
}

impl Elevation for AmbientElevation {
    fn prepare(&self, argv: Vec<String>) -> Prepared {
        Prepared {
            argv,
            notice: Some(self.notice.clone()),
            wrapped: false,
        }
    }

    fn describe(&self) -> String {
        "ambient".to_string()
    }
}

/// Resolves which wrapper will be used: the configured tool first, then `pkexec`.
#[cfg(unix)]
pub fn resolve_escalation_tool(configured: Option<&str>) -> Option<String> {
    let mut tools = vec!["pkexec"];
    if let Some(custom) = configured {
        tools.insert(0, custom);
    }
    tools
        .iter()
        .find(|t| which::which(t).is_ok())
        .map(|t| t.to_string())
}

/// Picks the platform's elevation strategy once.
#[cfg(unix)]
pub fn select_elevation(configured: Option<&str>) -> Arc<dyn Elevation> {
    match resolve_escalation_tool(configured) {
        Some(tool) => {
            log::debug!("Using elevation wrapper: {}", tool);
            Arc::new(WrapperElevation::new(tool))
        }
        None => {
            log::warn!("No graphical elevation tool found; elevated commands run as the current user.");
            Arc::new(AmbientElevation::new(
                "No graphical elevation tool (pkexec) found; running without elevation.",
            ))
        }
    }
}

#[cfg(windows)]
pub fn select_elevation(_configured: Option<&str>) -> Arc<dyn Elevation> {
    Arc::new(AmbientElevation::new(
        "Windows commands requiring elevation usually prompt or need an elevated terminal.",
    ))
}

#[cfg(not(any(unix, windows)))]
pub fn select_elevation(_configured: Option<&str>) -> Arc<dyn Elevation> {
    Arc::new(AmbientElevation::new("Elevation is not supported on this platform."))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn wrapper_prefixes_the_command() {
        let elevation = WrapperElevation::new("/usr/bin/pkexec");
        let prepared = elevation.prepare(argv(&["systemctl", "start", "tailscaled"]));
        assert_eq!(
            prepared.argv,
            argv(&["/usr/bin/pkexec", "systemctl", "start", "tailscaled"])
        );
        assert!(prepared.wrapped);
        assert_eq!(
            prepared.notice.as_deref(),
            Some("Elevated command: using pkexec.")
        );
    }

    #[test]
    fn pkexec_refusal_codes_are_recognised() {
        let elevation = WrapperElevation::new("pkexec");
        assert!(elevation.denied(126));
        assert!(elevation.denied(127));
        assert!(!elevation.denied(1));
        assert!(!WrapperElevation::new("doas").denied(127));
    }

    #[test]
    fn ambient_leaves_the_command_alone() {
        let elevation = AmbientElevation::new("already elevated");
        let prepared = elevation.prepare(argv(&["tailscale", "up"]));
        assert_eq!(prepared.argv, argv(&["tailscale", "up"]));
        assert!(!prepared.wrapped);
        assert!(!elevation.denied(127));
    }
}
