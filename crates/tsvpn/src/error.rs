use std::time::Duration;

use crate::session::SessionState;

/// High-level error category for UI display purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// External process errors - spawn, exit status, privilege elevation
    Process,
    /// Authentication errors - missing key, login never completed
    Authentication,
    /// Startup errors - single instance lock
    Startup,
    /// Daemon status could not be read reliably
    Status,
    /// Profile, settings and storage errors
    Configuration,
}

/// Error types produced by the connection orchestration subsystem.
#[derive(Debug, Clone)]
pub enum VpnError {
    /// The executable could not be found or started.
    ProcessSpawn {
        program: String,
        message: String,
    },
    /// The process ran but failed (non-zero exit, I/O failure while reading it).
    ProcessExecution {
        program: String,
        message: String,
    },
    /// The elevation wrapper refused to run the command.
    Elevation {
        message: String,
    },
    /// The single instance lock could not be taken for a reason other than
    /// another instance holding it.
    LockAcquisition {
        message: String,
    },
    /// The daemon never reported a connected state within the bounded wait.
    PollingTimeout {
        waited: Duration,
    },
    /// Status output could not be interpreted.
    ParsingAmbiguity {
        message: String,
    },
    MissingAuthKey {
        profile: String,
    },
    MissingServerUrl {
        profile: String,
    },
    /// `up` finished but the daemon does not report a connection.
    LoginFailed {
        profile: String,
    },
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },
    InvalidProfileName {
        name: String,
    },
    AnotherSessionActive {
        profile: String,
    },
    /// The operation needs an idle session.
    SessionBusy {
        profile: String,
        state: SessionState,
    },
    Storage {
        message: String,
    },
}

impl VpnError {
    /// Returns the high-level category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            VpnError::ProcessSpawn { .. }
            | VpnError::ProcessExecution { .. }
            | VpnError::Elevation { .. } => ErrorCategory::Process,
            VpnError::MissingAuthKey { .. }
            | VpnError::LoginFailed { .. }
            | VpnError::PollingTimeout { .. } => ErrorCategory::Authentication,
            VpnError::LockAcquisition { .. } => ErrorCategory::Startup,
            VpnError::ParsingAmbiguity { .. } => ErrorCategory::Status,
            VpnError::InvalidTransition { .. }
            | VpnError::MissingServerUrl { .. }
            | VpnError::InvalidProfileName { .. }
            | VpnError::AnotherSessionActive { .. }
            | VpnError::SessionBusy { .. }
            | VpnError::Storage { .. } => ErrorCategory::Configuration,
        }
    }

    /// Returns true if the application must exit after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, VpnError::LockAcquisition { .. })
    }

    /// Returns the user-facing error message
    pub fn user_message(&self) -> String {
        match self {
            VpnError::ProcessSpawn { program, message } => format!(
                "Error: {} command not found. Ensure it is installed and in your PATH.\n\n{}",
                program, message
            ),
            VpnError::ProcessExecution { program, message } => {
                format!("Error running command '{}': {}", program, message)
            }
            VpnError::Elevation { message } => {
                format!("Administrator privileges were not granted.\n\n{}", message)
            }
            VpnError::LockAcquisition { message } => {
                format!("Could not acquire the application lock.\n\n{}", message)
            }
            VpnError::PollingTimeout { waited } => format!(
                "Timed out waiting for the VPN to connect ({}s).",
                waited.as_secs()
            ),
            VpnError::ParsingAmbiguity { message } => {
                format!("Could not interpret daemon status: {}", message)
            }
            VpnError::MissingAuthKey { profile } => {
                format!("Error: Auth key is missing for profile '{}'.", profile)
            }
            VpnError::MissingServerUrl { profile } => {
                format!("No server URL is saved for profile '{}'.", profile)
            }
            VpnError::LoginFailed { profile } => format!(
                "Login failed for profile '{}'. Check logs or try again.",
                profile
            ),
            VpnError::InvalidTransition { from, to } => {
                format!("Cannot go from {:?} to {:?}.", from, to)
            }
            VpnError::InvalidProfileName { name } => format!(
                "Invalid profile name '{}'. Please use letters, digits, spaces, '.', '_' or '-'.",
                name
            ),
            VpnError::AnotherSessionActive { profile } => format!(
                "Profile '{}' is already connected. Disconnect it first.",
                profile
            ),
            VpnError::SessionBusy { profile, state } => format!(
                "Profile '{}' is busy ({:?}). Disconnect it first.",
                profile, state
            ),
            VpnError::Storage { message } => format!("Storage error: {}", message),
        }
    }
}

impl std::fmt::Display for VpnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for VpnError {}

impl From<anyhow::Error> for VpnError {
    fn from(err: anyhow::Error) -> Self {
        VpnError::Storage {
            message: format!("{:#}", err),
        }
    }
}

impl From<std::io::Error> for VpnError {
    fn from(err: std::io::Error) -> Self {
        VpnError::Storage {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_errors_are_fatal_startup_errors() {
        let err = VpnError::LockAcquisition {
            message: "permission denied".into(),
        };
        assert!(err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::Startup);
    }

    #[test]
    fn process_errors_are_not_fatal() {
        let err = VpnError::ProcessSpawn {
            program: "tailscale".into(),
            message: "No such file or directory".into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.category(), ErrorCategory::Process);
        assert!(err.to_string().contains("tailscale command not found"));
    }
}
