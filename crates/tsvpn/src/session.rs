//! Per-profile connection state machine.
//!
//! [`ConnectionSession::connect`] and [`ConnectionSession::disconnect`] switch
//! state synchronously and then run the slow part (service start, `tailscale
//! up`, status polling, `tailscale logout`) on a worker thread. Progress is
//! published on the [`EventHub`]; the final result arrives on the returned
//! [`TaskHandle`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use log::Level;

use crate::browser::{BrowserOpener, SystemBrowser};
use crate::config::Settings;
use crate::crypto::KeyCipher;
use crate::error::VpnError;
use crate::events::{EventHub, ProgressStep, SessionEvent, StatusColor};
use crate::process::{CommandRunner, ProcessRunner};
use crate::profile::{AuthMode, FileProfileStore, ProfileStore};
use crate::sso::SsoFlow;
use crate::status::StatusPoller;
use crate::tailscale::{service_start_command, TailscaleCli};
use crate::task::TaskHandle;
use crate::telemetry::{InterfaceCounters, SysinfoCounters, TelemetryLogger};
use crate::traffic::{SqliteTrafficStore, TrafficStore};
use crate::utils::{mask_command, AppPaths};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingSso,
    Connected,
    Disconnecting,
    Failed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Disconnected | Failed, Connecting) => true,
            (Connecting, AwaitingSso | Connected | Failed) => true,
            (AwaitingSso, Connected | Failed) => true,
            (Disconnecting, Disconnected) => true,
            (from, Disconnecting) => from != Disconnecting,
            _ => false,
        }
    }

    /// Anything other than Disconnected or Failed.
    pub fn is_active(self) -> bool {
        !matches!(self, SessionState::Disconnected | SessionState::Failed)
    }
}

/// How a connect operation ended.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    Connected,
    Failed(VpnError),
    /// A disconnect was requested while this connect was running; the
    /// disconnect owns the final state.
    Superseded,
}

/// Everything a session talks to. Cheap to clone.
#[derive(Clone)]
pub struct SessionContext {
    pub runner: Arc<dyn CommandRunner>,
    pub cli: TailscaleCli,
    pub profiles: Arc<dyn ProfileStore>,
    pub traffic: Arc<dyn TrafficStore>,
    pub counters: Arc<dyn InterfaceCounters>,
    pub browser: Arc<dyn BrowserOpener>,
    pub events: Arc<EventHub>,
    pub settings: Settings,
}

impl SessionContext {
    /// Wires up the real process runner, stores and interface counters.
    pub fn system(settings: Settings, paths: &AppPaths) -> Result<Self, VpnError> {
        let browser: Arc<dyn BrowserOpener> = Arc::new(SystemBrowser);
        let cipher = Arc::new(KeyCipher::from_env()?);
        Ok(Self {
            runner: Arc::new(ProcessRunner::from_settings(&settings, Arc::clone(&browser))),
            cli: TailscaleCli::locate(&settings.tailscale_path),
            profiles: Arc::new(FileProfileStore::new(&paths.data, cipher)),
            traffic: Arc::new(SqliteTrafficStore::open(paths.traffic_db())?),
            counters: Arc::new(SysinfoCounters::new(&settings.interface_pattern)),
            browser,
            events: Arc::new(EventHub::new()),
            settings,
        })
    }

    fn poller(&self) -> StatusPoller {
        StatusPoller::from_settings(Arc::clone(&self.runner), self.cli.clone(), &self.settings)
    }
}

struct Shared {
    profile: String,
    ctx: SessionContext,
    state: Mutex<SessionState>,
    /// Bumped by every disconnect; a connect worker started under an older
    /// epoch must not touch the state when it finishes.
    epoch: AtomicU64,
    telemetry: Mutex<Option<TelemetryLogger>>,
}

pub struct ConnectionSession {
    shared: Arc<Shared>,
}

impl ConnectionSession {
    pub fn new(profile: impl Into<String>, ctx: SessionContext) -> Self {
        Self {
            shared: Arc::new(Shared {
                profile: profile.into(),
                ctx,
                state: Mutex::new(SessionState::Disconnected),
                epoch: AtomicU64::new(0),
                telemetry: Mutex::new(None),
            }),
        }
    }

    pub fn profile(&self) -> &str {
        &self.shared.profile
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.lock().unwrap()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn is_logged_in(&self) -> bool {
        self.is_connected()
    }

    pub fn telemetry_running(&self) -> bool {
        self.shared
            .telemetry
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(TelemetryLogger::is_running)
    }

    pub fn auth_mode(&self) -> AuthMode {
        self.shared.ctx.profiles.load_auth_mode(&self.shared.profile)
    }

    /// Changes the stored auth mode. Only allowed while the session is idle.
    pub fn set_auth_mode(&self, mode: AuthMode) -> Result<(), VpnError> {
        let state = self.shared.state.lock().unwrap();
        if state.is_active() {
            return Err(VpnError::SessionBusy {
                profile: self.shared.profile.clone(),
                state: *state,
            });
        }
        self.shared
            .ctx
            .profiles
            .save_auth_mode(&self.shared.profile, mode)?;
        log::info!("Auth mode for '{}' set to {}", self.shared.profile, mode);
        Ok(())
    }

    /// Starts connecting with `key` (ignored in SSO mode) to `server_url`.
    ///
    /// Fails immediately if the session is already active.
    pub fn connect(
        &self,
        key: &str,
        server_url: &str,
    ) -> Result<TaskHandle<ConnectOutcome>, VpnError> {
        let epoch = {
            let mut state = self.shared.state.lock().unwrap();
            self.shared.transition(&mut state, SessionState::Connecting)?;
            self.shared.epoch.load(Ordering::SeqCst)
        };
        self.shared
            .ctx
            .events
            .status(&self.shared.profile, "Connecting...", StatusColor::Yellow);

        let shared = Arc::clone(&self.shared);
        let key = key.trim().to_string();
        let server_url = server_url.trim().to_string();
        Ok(TaskHandle::spawn(move || {
            let result = shared.run_connect(epoch, &key, &server_url);
            shared.finish_connect(epoch, result)
        }))
    }

    /// Logs out unconditionally and ends in Disconnected.
    pub fn disconnect(&self) -> Result<TaskHandle<()>, VpnError> {
        {
            let mut state = self.shared.state.lock().unwrap();
            self.shared.transition(&mut state, SessionState::Disconnecting)?;
            self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        }
        self.shared
            .ctx
            .events
            .status(&self.shared.profile, "Disconnecting...", StatusColor::Yellow);

        let shared = Arc::clone(&self.shared);
        Ok(TaskHandle::spawn(move || shared.run_disconnect()))
    }
}

impl Shared {
    fn transition(
        &self,
        state: &mut MutexGuard<'_, SessionState>,
        next: SessionState,
    ) -> Result<(), VpnError> {
        let from = **state;
        if !from.can_transition_to(next) {
            log::debug!("'{}': rejected {:?} -> {:?}", self.profile, from, next);
            return Err(VpnError::InvalidTransition { from, to: next });
        }
        log::debug!("'{}': {:?} -> {:?}", self.profile, from, next);
        **state = next;
        self.ctx
            .events
            .publish(&self.profile, SessionEvent::StateChanged(next));
        Ok(())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    fn output(&self, line: impl Into<String>) {
        self.ctx.events.output(&self.profile, line);
    }

    fn progress(&self, message: &str, step: ProgressStep) {
        self.ctx.events.progress(&self.profile, message, step);
    }

    fn history(&self, level: Level, entry: &str) {
        self.ctx.profiles.append_log(&self.profile, level, entry);
    }

    /// Everything up to the final verdict of a connect.
    fn run_connect(&self, epoch: u64, key: &str, server_url: &str) -> Result<(), VpnError> {
        if let Err(e) = self.ctx.profiles.save_key(&self.profile, key) {
            log::error!("Error saving key for '{}': {:#}", self.profile, e);
        }
        if let Err(e) = self.ctx.profiles.save_url(&self.profile, server_url) {
            log::error!("Error saving URL for '{}': {:#}", self.profile, e);
        }

        let mode = self.ctx.profiles.load_auth_mode(&self.profile);
        if mode == AuthMode::KeyAuth && key.is_empty() {
            self.output("Error: Auth key is missing.");
            self.history(Level::Debug, "Missing auth key in 'auth_key' mode.");
            return Err(VpnError::MissingAuthKey {
                profile: self.profile.clone(),
            });
        }

        self.start_service();

        let argv = self.ctx.cli.up(
            server_url,
            (mode == AuthMode::KeyAuth).then_some(key),
        );
        if mode == AuthMode::Sso {
            self.output("Using SSO login mode.");
            self.history(Level::Debug, "Using SSO login mode.");
        }
        let shown = format!("Running: {}", mask_command(&argv));
        self.output(shown.as_str());
        self.history(Level::Debug, &shown);

        match mode {
            AuthMode::KeyAuth => self.up_with_key(&argv),
            AuthMode::Sso => self.up_with_sso(epoch, &argv),
        }
    }

    fn start_service(&self) {
        let Some(argv) = service_start_command() else {
            return;
        };
        self.progress("Starting Tailscale service...", ProgressStep::Started);
        let out = self.ctx.runner.execute(&argv, true);
        if let Some(notice) = &out.notice {
            self.output(notice.as_str());
        }
        if !out.success() {
            log::warn!("Service start failed: {}", out.text.trim());
            self.output(format!("Could not start the Tailscale service: {}", out.text.trim()));
        }
        thread::sleep(self.ctx.settings.service_start_delay());
        self.progress("Starting Tailscale service...", ProgressStep::Completed);
    }

    fn up_with_key(&self, argv: &[String]) -> Result<(), VpnError> {
        self.progress("Connecting...", ProgressStep::Started);
        let events = Arc::clone(&self.ctx.events);
        let profile = self.profile.clone();
        let out = self
            .ctx
            .runner
            .execute_streaming(argv, true, &mut |line| events.output(&profile, line));

        self.history(Level::Debug, "Attempting to connect...");
        self.history(Level::Debug, &format!("Command output:\n{}", out.text.trim()));

        if let Some(e) = out.error(self.ctx.cli.program()) {
            self.output(e.user_message());
            return Err(e);
        }

        self.output("Verifying connection...");
        let poller = self.ctx.poller();
        let up_failed = out.text.to_lowercase().contains("failed");
        if !up_failed && poller.verify_connected() {
            Ok(())
        } else {
            Err(VpnError::LoginFailed {
                profile: self.profile.clone(),
            })
        }
    }

    fn up_with_sso(&self, epoch: u64, argv: &[String]) -> Result<(), VpnError> {
        self.progress("Waiting for SSO login...", ProgressStep::Started);
        let settings = &self.ctx.settings;
        let flow = SsoFlow::new(
            Arc::clone(&self.ctx.runner),
            Arc::new(self.ctx.poller()),
            Arc::clone(&self.ctx.browser),
            settings.connect_timeout(),
            settings.poll_interval(),
        );

        let result = flow.run(
            argv,
            true,
            &settings.sso_url_marker,
            &mut |line| self.output(line),
            &mut |url| {
                self.history(Level::Debug, &format!("SSO login URL: {}", url));
                self.output(format!("SSO Login URL: {}", url));
                self.ctx.events.popup(
                    &self.profile,
                    "SSO Login Required",
                    format!("Please authenticate in your browser:\n\n{}", url),
                );
                let mut state = self.state.lock().unwrap();
                if self.is_current(epoch) {
                    let _ = self.transition(&mut state, SessionState::AwaitingSso);
                }
            },
        );
        if let Err(e) = &result {
            self.output(e.user_message());
        }
        result
    }

    /// Applies the verdict unless a disconnect happened in the meantime.
    fn finish_connect(&self, epoch: u64, result: Result<(), VpnError>) -> ConnectOutcome {
        let stale = {
            let mut state = self.state.lock().unwrap();
            if !self.is_current(epoch) {
                None
            } else {
                match &result {
                    Ok(()) => {
                        self.transition(&mut state, SessionState::Connected).ok();
                        // Installed under the state lock: a disconnect that
                        // bumps the epoch after this point finds it.
                        let fresh = TelemetryLogger::start(
                            self.profile.clone(),
                            Arc::clone(&self.ctx.counters),
                            Arc::clone(&self.ctx.traffic),
                            self.ctx.settings.telemetry_interval(),
                        );
                        Some(self.telemetry.lock().unwrap().replace(fresh))
                    }
                    Err(_) => {
                        self.transition(&mut state, SessionState::Failed).ok();
                        Some(self.telemetry.lock().unwrap().take())
                    }
                }
            }
        };

        let Some(previous) = stale else {
            log::info!("Connect for '{}' superseded by a disconnect", self.profile);
            return ConnectOutcome::Superseded;
        };
        if let Some(previous) = previous {
            previous.stop(self.ctx.settings.telemetry_join_timeout());
        }

        match result {
            Ok(()) => {
                self.ctx
                    .events
                    .status(&self.profile, "Connected", StatusColor::Green);
                self.ctx.events.publish(&self.profile, SessionEvent::Connected);
                self.history(Level::Info, "Connection successful.");
                self.progress("Connected successfully!", ProgressStep::Cleared);
                log::info!("'{}' connected", self.profile);
                ConnectOutcome::Connected
            }
            Err(e) => {
                self.ctx
                    .events
                    .status(&self.profile, "Disconnected", StatusColor::Red);
                self.ctx.events.popup(&self.profile, "Connection Failed", e.user_message());
                self.ctx.events.publish(&self.profile, SessionEvent::LoggedOut);
                self.history(Level::Error, &format!("Connection failed: {}", e));
                self.progress("Connection failed.", ProgressStep::Cleared);
                log::error!("'{}' failed to connect: {}", self.profile, e);
                ConnectOutcome::Failed(e)
            }
        }
    }

    fn run_disconnect(&self) {
        self.output("Disconnecting from Tailscale...");
        self.progress("Disconnecting...", ProgressStep::Started);

        let out = self.ctx.runner.execute(&self.ctx.cli.logout(), false);
        self.history(Level::Debug, &format!("Disconnect output:\n{}", out.text.trim()));
        if !out.success() {
            log::warn!("logout for '{}' did not succeed: {}", self.profile, out.text.trim());
        }

        {
            let mut state = self.state.lock().unwrap();
            if let Err(e) = self.transition(&mut state, SessionState::Disconnected) {
                log::warn!("'{}': {}", self.profile, e);
                *state = SessionState::Disconnected;
                self.ctx.events.publish(
                    &self.profile,
                    SessionEvent::StateChanged(SessionState::Disconnected),
                );
            }
        }

        let events = &self.ctx.events;
        events.status(&self.profile, "Disconnected", StatusColor::Red);
        events.publish(&self.profile, SessionEvent::LoggedOut);
        events.publish(&self.profile, SessionEvent::PostDisconnect);
        events.publish(&self.profile, SessionEvent::PostLogout);

        let logger = self.telemetry.lock().unwrap().take();
        if let Some(logger) = logger {
            logger.stop(self.ctx.settings.telemetry_join_timeout());
        }
        self.progress("Disconnected.", ProgressStep::Cleared);
        log::info!("'{}' disconnected", self.profile);
    }
}
