//! Connection profiles and their on-disk store.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Local;

use crate::crypto::KeyCipher;
use crate::error::VpnError;

const URL_FILE: &str = "Tailscale_VPN_url";
const KEY_FILE: &str = "Tailscale_VPN_key";
const AUTH_MODE_FILE: &str = "auth_mode";
const PROFILE_LOG_FILE: &str = "connection.log";

/// How a profile authenticates against the login server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Pre-shared auth key passed on the command line.
    #[default]
    KeyAuth,
    /// Browser login through the server's identity provider.
    Sso,
}

impl AuthMode {
    /// The marker stored in the profile's `auth_mode` file.
    pub fn marker(self) -> &'static str {
        match self {
            AuthMode::KeyAuth => "auth_key",
            AuthMode::Sso => "google",
        }
    }

    /// Reads a stored marker; anything unrecognised is key auth.
    pub fn from_marker(marker: &str) -> Self {
        if marker.trim().eq_ignore_ascii_case("google") {
            AuthMode::Sso
        } else {
            AuthMode::KeyAuth
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMode::KeyAuth => write!(f, "auth key"),
            AuthMode::Sso => write!(f, "SSO"),
        }
    }
}

impl FromStr for AuthMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "key" | "auth_key" | "authkey" => Ok(AuthMode::KeyAuth),
            "sso" | "google" => Ok(AuthMode::Sso),
            other => Err(format!("unknown auth mode '{}' (expected 'key' or 'sso')", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    pub auth_mode: AuthMode,
    pub server_url: String,
    /// Decrypted key; `None` when no key is stored.
    pub auth_key: Option<String>,
}

/// Turns a display name into a directory name: alphanumerics, space, `.`,
/// `_` and `-` are kept, the rest dropped, then spaces become underscores.
pub fn sanitize_profile_name(name: &str) -> Result<String, VpnError> {
    let kept: String = name
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '.' | '_' | '-'))
        .collect();
    let sanitized = kept.trim().replace(' ', "_");
    if sanitized.is_empty() {
        return Err(VpnError::InvalidProfileName {
            name: name.to_string(),
        });
    }
    Ok(sanitized)
}

/// Persistence for profile credentials and per-profile history.
pub trait ProfileStore: Send + Sync {
    fn save_url(&self, profile: &str, url: &str) -> anyhow::Result<()>;

    /// Stores `key` encrypted.
    fn save_key(&self, profile: &str, key: &str) -> anyhow::Result<()>;

    /// Stored auth mode, [`AuthMode::KeyAuth`] when none was saved.
    fn load_auth_mode(&self, profile: &str) -> AuthMode;

    fn save_auth_mode(&self, profile: &str, mode: AuthMode) -> anyhow::Result<()>;

    /// Stored URL, empty when none was saved.
    fn load_url(&self, profile: &str) -> anyhow::Result<String>;

    /// Stored key decrypted, empty when none was saved or it does not decrypt.
    fn load_key(&self, profile: &str) -> anyhow::Result<String>;

    fn list_profiles(&self) -> anyhow::Result<Vec<String>>;

    fn remove_profile(&self, profile: &str) -> anyhow::Result<()>;

    /// Appends one line to the profile's history. Failures are only logged.
    fn append_log(&self, _profile: &str, _level: log::Level, _entry: &str) {}

    fn load_profile(&self, profile: &str) -> anyhow::Result<Profile> {
        let key = self.load_key(profile)?;
        Ok(Profile {
            name: profile.to_string(),
            auth_mode: self.load_auth_mode(profile),
            server_url: self.load_url(profile)?,
            auth_key: (!key.is_empty()).then_some(key),
        })
    }
}

/// One directory per profile under `root`.
pub struct FileProfileStore {
    root: PathBuf,
    cipher: Arc<KeyCipher>,
}

impl FileProfileStore {
    pub fn new(root: impl Into<PathBuf>, cipher: Arc<KeyCipher>) -> Self {
        Self {
            root: root.into(),
            cipher,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn profile_dir(&self, profile: &str) -> Result<PathBuf, VpnError> {
        Ok(self.root.join(sanitize_profile_name(profile)?))
    }

    fn file(&self, profile: &str, name: &str) -> anyhow::Result<PathBuf> {
        let dir = self.profile_dir(profile)?;
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(dir.join(name))
    }

    fn read_trimmed(&self, profile: &str, name: &str) -> anyhow::Result<Option<String>> {
        let path = self.profile_dir(profile)?.join(name);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
        }
    }

    fn write(&self, profile: &str, name: &str, contents: &str) -> anyhow::Result<()> {
        let path = self.file(profile, name)?;
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))
    }
}

impl ProfileStore for FileProfileStore {
    fn save_url(&self, profile: &str, url: &str) -> anyhow::Result<()> {
        self.write(profile, URL_FILE, url.trim())
    }

    fn save_key(&self, profile: &str, key: &str) -> anyhow::Result<()> {
        self.write(profile, KEY_FILE, &self.cipher.encrypt(key.trim()))
    }

    fn load_auth_mode(&self, profile: &str) -> AuthMode {
        match self.read_trimmed(profile, AUTH_MODE_FILE) {
            Ok(Some(marker)) => AuthMode::from_marker(&marker),
            Ok(None) => AuthMode::default(),
            Err(e) => {
                log::error!("Error loading auth mode for '{}': {:#}", profile, e);
                AuthMode::default()
            }
        }
    }

    fn save_auth_mode(&self, profile: &str, mode: AuthMode) -> anyhow::Result<()> {
        self.write(profile, AUTH_MODE_FILE, mode.marker())
    }

    fn load_url(&self, profile: &str) -> anyhow::Result<String> {
        Ok(self.read_trimmed(profile, URL_FILE)?.unwrap_or_default())
    }

    fn load_key(&self, profile: &str) -> anyhow::Result<String> {
        Ok(self
            .read_trimmed(profile, KEY_FILE)?
            .map(|token| self.cipher.decrypt(&token))
            .unwrap_or_default())
    }

    fn list_profiles(&self) -> anyhow::Result<Vec<String>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("listing {}", self.root.display())),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn remove_profile(&self, profile: &str) -> anyhow::Result<()> {
        let dir = self.profile_dir(profile)?;
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("removing {}", dir.display())),
        }
    }

    fn append_log(&self, profile: &str, level: log::Level, entry: &str) {
        let result = self.file(profile, PROFILE_LOG_FILE).and_then(|path| {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(
                file,
                "{} [{}] {}",
                Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                level,
                entry
            )?;
            Ok(())
        });
        if let Err(e) = result {
            log::error!("Error writing profile log for '{}': {:#}", profile, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store(root: &Path) -> FileProfileStore {
        FileProfileStore::new(root, Arc::new(KeyCipher::from_passphrase("test").unwrap()))
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_profile_name("  My Office!  ").unwrap(), "My_Office");
        assert_eq!(sanitize_profile_name("lab-2.eu_west").unwrap(), "lab-2.eu_west");
        assert!(matches!(
            sanitize_profile_name("/// ***"),
            Err(VpnError::InvalidProfileName { .. })
        ));
    }

    #[test]
    fn auth_mode_markers() {
        assert_eq!(AuthMode::from_marker("google"), AuthMode::Sso);
        assert_eq!(AuthMode::from_marker("GOOGLE\n"), AuthMode::Sso);
        assert_eq!(AuthMode::from_marker("auth_key"), AuthMode::KeyAuth);
        assert_eq!(AuthMode::from_marker("something else"), AuthMode::KeyAuth);
        assert_eq!(AuthMode::Sso.marker(), "google");
        assert_eq!("sso".parse::<AuthMode>().unwrap(), AuthMode::Sso);
    }

    #[test]
    fn missing_auth_mode_defaults_to_key_auth() {
        let dir = tempdir().unwrap();
        assert_eq!(store(dir.path()).load_auth_mode("office"), AuthMode::KeyAuth);
    }

    #[test]
    fn credentials_round_trip_and_key_is_encrypted() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        store.save_url("My Office", " https://hs.example.com \n").unwrap();
        store.save_key("My Office", "tskey-auth-1").unwrap();
        store.save_auth_mode("My Office", AuthMode::Sso).unwrap();

        let on_disk = fs::read_to_string(dir.path().join("My_Office").join(KEY_FILE)).unwrap();
        assert!(!on_disk.contains("tskey-auth-1"));

        let profile = store.load_profile("My Office").unwrap();
        assert_eq!(profile.server_url, "https://hs.example.com");
        assert_eq!(profile.auth_key.as_deref(), Some("tskey-auth-1"));
        assert_eq!(profile.auth_mode, AuthMode::Sso);
        assert_eq!(
            fs::read_to_string(dir.path().join("My_Office").join(AUTH_MODE_FILE)).unwrap(),
            "google"
        );
    }

    #[test]
    fn list_and_remove() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.save_url("beta", "https://b").unwrap();
        store.save_url("alpha", "https://a").unwrap();

        assert_eq!(store.list_profiles().unwrap(), ["alpha", "beta"]);
        store.remove_profile("alpha").unwrap();
        store.remove_profile("alpha").unwrap();
        assert_eq!(store.list_profiles().unwrap(), ["beta"]);
    }

    #[test]
    fn profile_log_is_appended() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.append_log("office", log::Level::Debug, "Running: tailscale up");
        store.append_log("office", log::Level::Info, "Connection successful.");

        let log = fs::read_to_string(dir.path().join("office").join(PROFILE_LOG_FILE)).unwrap();
        let lines: Vec<_> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[DEBUG] Running: tailscale up"));
        assert!(lines[1].ends_with("[INFO] Connection successful."));
    }
}
