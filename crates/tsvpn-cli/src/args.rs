use clap::{Parser, Subcommand, ValueEnum};
use log::LevelFilter;

/// Supervises Tailscale/Headscale connection profiles from the terminal.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Log verbosity
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info, global = true)]
    pub level: LogLevel,

    /// Write logs to the application log file instead of the terminal
    #[arg(long, global = true)]
    pub log_file: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage connection profiles
    #[command(subcommand)]
    Profile(ProfileCommand),

    /// Connect a profile and stay in the foreground until Ctrl+C
    Connect {
        /// Profile name (defaults to the last used profile)
        profile: Option<String>,

        /// Auth key to use instead of the stored one
        #[arg(long)]
        key: Option<String>,

        /// Login server URL to use instead of the stored one
        #[arg(long)]
        url: Option<String>,

        /// Exit once connected instead of waiting for Ctrl+C
        #[arg(short, long)]
        detach: bool,
    },

    /// Log the daemon out
    Disconnect {
        /// Profile name (defaults to the last used profile)
        profile: Option<String>,
    },

    /// Show whether the daemon reports a connection
    Status {
        /// Print the raw `tailscale status --json` document
        #[arg(long)]
        json: bool,
    },

    /// Show recorded traffic
    Traffic {
        /// Only this profile
        profile: Option<String>,
    },

    /// Show or change settings
    Settings {
        /// Connect the last used profile when `tsvpn auto` runs
        #[arg(long)]
        auto_connect: Option<bool>,

        /// How the daemon status is checked
        #[arg(long, value_enum)]
        status_method: Option<StatusMethodArg>,

        /// Path or name of the tailscale executable
        #[arg(long)]
        tailscale_path: Option<String>,

        /// Elevation wrapper to try before pkexec (Unix)
        #[arg(long)]
        escalation_tool: Option<String>,
    },

    /// Connect the last used profile if auto-connect is enabled
    Auto {
        #[arg(short, long)]
        detach: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// Create or update a profile
    Add {
        name: String,

        /// Login server URL
        #[arg(long)]
        url: String,

        /// Auth key (prompted for when omitted in key mode)
        #[arg(long, conflicts_with = "sso")]
        key: Option<String>,

        /// Log in through the browser instead of an auth key
        #[arg(long)]
        sso: bool,
    },

    /// List profiles
    List,

    /// Delete a profile and its stored data
    Remove {
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Switch a profile between auth key and SSO login
    Mode { name: String, mode: ModeArg },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ModeArg {
    Key,
    Sso,
}

impl From<ModeArg> for tsvpn::AuthMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Key => tsvpn::AuthMode::KeyAuth,
            ModeArg::Sso => tsvpn::AuthMode::Sso,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum StatusMethodArg {
    Json,
    Text,
}

impl From<StatusMethodArg> for tsvpn::StatusMethod {
    fn from(method: StatusMethodArg) -> Self {
        match method {
            StatusMethodArg::Json => tsvpn::StatusMethod::Json,
            StatusMethodArg::Text => tsvpn::StatusMethod::Text,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => LevelFilter::Off,
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}
