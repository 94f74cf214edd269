//! One session per profile, and at most one of them connected.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use crate::error::VpnError;
use crate::events::EventHub;
use crate::profile::{sanitize_profile_name, AuthMode};
use crate::session::{ConnectOutcome, ConnectionSession, SessionContext, SessionState};
use crate::task::TaskHandle;

pub struct SessionManager {
    ctx: SessionContext,
    sessions: Mutex<BTreeMap<String, Arc<ConnectionSession>>>,
}

impl SessionManager {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            sessions: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.ctx.events
    }

    /// The session for `profile`, created on first use.
    pub fn session(&self, profile: &str) -> Result<Arc<ConnectionSession>, VpnError> {
        let name = sanitize_profile_name(profile)?;
        let mut sessions = self.sessions.lock().unwrap();
        Ok(Arc::clone(sessions.entry(name.clone()).or_insert_with(|| {
            Arc::new(ConnectionSession::new(name, self.ctx.clone()))
        })))
    }

    /// Connects `profile`. Missing `key`/`server_url` fall back to what is
    /// stored for the profile.
    ///
    /// Refused while any other profile is connecting or connected.
    pub fn connect(
        &self,
        profile: &str,
        key: Option<&str>,
        server_url: Option<&str>,
    ) -> Result<TaskHandle<ConnectOutcome>, VpnError> {
        let name = sanitize_profile_name(profile)?;
        let store = &self.ctx.profiles;

        let key = match key {
            Some(key) => key.to_string(),
            None => store.load_key(&name)?,
        };
        let server_url = match server_url {
            Some(url) => url.trim().to_string(),
            None => store.load_url(&name)?,
        };
        if server_url.is_empty() {
            return Err(VpnError::MissingServerUrl { profile: name });
        }

        // The check and the state switch happen under one lock.
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(other) = sessions.iter().find_map(|(other, session)| {
            let busy = matches!(
                session.state(),
                SessionState::Connecting | SessionState::AwaitingSso | SessionState::Connected
            );
            (other != &name && busy).then(|| other.clone())
        }) {
            return Err(VpnError::AnotherSessionActive { profile: other });
        }

        let session = sessions
            .entry(name.clone())
            .or_insert_with(|| Arc::new(ConnectionSession::new(name, self.ctx.clone())));
        session.connect(&key, &server_url)
    }

    pub fn disconnect(&self, profile: &str) -> Result<TaskHandle<()>, VpnError> {
        self.session(profile)?.disconnect()
    }

    /// Connects the last used profile (or the first one) if auto-connect is
    /// enabled. `None` when there is nothing to do.
    pub fn auto_connect(&self) -> Option<Result<TaskHandle<ConnectOutcome>, VpnError>> {
        let settings = &self.ctx.settings;
        if !settings.auto_connect {
            return None;
        }

        let profiles = match self.ctx.profiles.list_profiles() {
            Ok(profiles) => profiles,
            Err(e) => return Some(Err(e.into())),
        };
        let target = settings
            .last_profile
            .as_ref()
            .and_then(|last| sanitize_profile_name(last).ok())
            .filter(|last| profiles.contains(last))
            .or_else(|| profiles.first().cloned())?;

        log::info!("Auto-connecting profile '{}'", target);
        Some(self.connect(&target, None, None))
    }

    pub fn set_auth_mode(&self, profile: &str, mode: AuthMode) -> Result<(), VpnError> {
        self.session(profile)?.set_auth_mode(mode)
    }

    /// Deletes a profile's stored data. Refused while its session is active.
    pub fn remove_profile(&self, profile: &str) -> Result<(), VpnError> {
        let name = sanitize_profile_name(profile)?;
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get(&name) {
            let state = session.state();
            if state.is_active() {
                return Err(VpnError::SessionBusy {
                    profile: name,
                    state,
                });
            }
        }
        sessions.remove(&name);
        self.ctx.profiles.remove_profile(&name)?;
        Ok(())
    }

    pub fn connected_profile(&self) -> Option<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .find(|(_, s)| s.is_connected())
            .map(|(name, _)| name.clone())
    }

    pub fn states(&self) -> Vec<(String, SessionState)> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|(name, s)| (name.clone(), s.state()))
            .collect()
    }

    /// The application may only exit once every session is idle.
    pub fn can_shutdown(&self) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .all(|s| !s.state().is_active())
    }
}
