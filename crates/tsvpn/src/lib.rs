//! # Tailscale connection supervisor
//!
//! Manages named connection profiles for a `tailscale` daemon pointed at a
//! (usually self-hosted) login server: connect and disconnect with an auth
//! key or browser SSO, confirm the connection through the daemon status,
//! sample traffic while connected, and keep a single running instance.

pub mod browser;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod instance;
pub mod logger;
pub mod manager;
pub mod process;
pub mod profile;
pub mod session;
pub mod sso;
pub mod status;
pub mod tailscale;
pub mod task;
pub mod telemetry;
pub mod traffic;
pub mod utils;

// Re-export commonly used items
pub use config::{Settings, StatusMethod};
pub use error::{ErrorCategory, VpnError};
pub use events::{EventHub, ProfileEvent, ProgressStep, SessionEvent, SessionObserver, StatusColor};
pub use instance::{AcquireOutcome, SingleInstanceGuard};
pub use logger::{init_logger, rotate_log};
pub use manager::SessionManager;
pub use process::{CommandRunner, ExitOutcome, ProcessOutput, ProcessRunner};
pub use profile::{AuthMode, FileProfileStore, Profile, ProfileStore};
pub use session::{ConnectOutcome, ConnectionSession, SessionContext, SessionState};
pub use task::TaskHandle;
pub use utils::AppPaths;
