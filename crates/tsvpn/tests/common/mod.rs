#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::Local;
use crossbeam_channel::Receiver;
use tempfile::TempDir;

use tsvpn::browser::BrowserOpener;
use tsvpn::crypto::KeyCipher;
use tsvpn::events::{EventHub, ProfileEvent, SessionEvent};
use tsvpn::process::{CommandRunner, ExitOutcome, ProcessOutput};
use tsvpn::tailscale::TailscaleCli;
use tsvpn::telemetry::{InterfaceCounters, TelemetrySample};
use tsvpn::traffic::SqliteTrafficStore;
use tsvpn::{FileProfileStore, SessionContext, SessionState, Settings, StatusMethod, VpnError};

pub const ONLINE_JSON: &str = r#"{"Peer":{"p1":{"Online":true}}}"#;
pub const OFFLINE_JSON: &str = r#"{"Peer":null}"#;

/// One recorded command.
#[derive(Debug, Clone)]
pub struct Call {
    pub argv: Vec<String>,
    pub elevate: bool,
}

impl Call {
    pub fn subcommand(&self) -> &str {
        self.argv.get(1).map(String::as_str).unwrap_or_default()
    }
}

/// Plays the `tailscale` CLI: `up` streams `up_lines`, `status` answers from
/// the configured replies, everything else succeeds silently.
pub struct FakeTailscale {
    pub calls: Mutex<Vec<Call>>,
    pub up_lines: Mutex<Vec<String>>,
    pub up_delay: Mutex<Duration>,
    pub up_outcome: Mutex<ExitOutcome>,
    /// `None` makes `status --json` fail like a timed out query.
    pub status_json: Mutex<Option<String>>,
    pub status_text: Mutex<String>,
}

impl Default for FakeTailscale {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            up_lines: Mutex::new(vec!["Success.".to_string()]),
            up_delay: Mutex::new(Duration::ZERO),
            up_outcome: Mutex::new(ExitOutcome::Exited(0)),
            status_json: Mutex::new(Some(ONLINE_JSON.to_string())),
            status_text: Mutex::new("100.64.0.1  laptop  user@  linux  -".to_string()),
        }
    }
}

impl FakeTailscale {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, subcommand: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.subcommand() == subcommand)
            .collect()
    }

    pub fn set_up_lines(&self, lines: &[&str]) {
        *self.up_lines.lock().unwrap() = lines.iter().map(|l| l.to_string()).collect();
    }

    /// Makes `up` print `lines` and end with `outcome`.
    pub fn fail_up(&self, lines: &[&str], outcome: ExitOutcome) {
        self.set_up_lines(lines);
        *self.up_outcome.lock().unwrap() = outcome;
    }

    pub fn set_offline(&self) {
        *self.status_json.lock().unwrap() = Some(OFFLINE_JSON.to_string());
        *self.status_text.lock().unwrap() = "Logged out.".to_string();
    }

    fn record(&self, argv: &[String], elevate: bool) {
        self.calls.lock().unwrap().push(Call {
            argv: argv.to_vec(),
            elevate,
        });
    }
}

fn ok(text: String) -> ProcessOutput {
    ProcessOutput {
        text,
        outcome: ExitOutcome::Exited(0),
        notice: None,
    }
}

impl CommandRunner for FakeTailscale {
    fn execute(&self, argv: &[String], elevate: bool) -> ProcessOutput {
        self.record(argv, elevate);
        ok(String::new())
    }

    fn stream(
        &self,
        argv: &[String],
        elevate: bool,
        on_line: &mut dyn FnMut(&str),
    ) -> ProcessOutput {
        self.record(argv, elevate);
        thread::sleep(*self.up_delay.lock().unwrap());
        let lines = self.up_lines.lock().unwrap().clone();
        for line in &lines {
            on_line(line);
        }
        ProcessOutput {
            text: lines.join("\n"),
            outcome: self.up_outcome.lock().unwrap().clone(),
            notice: None,
        }
    }

    fn query(&self, argv: &[String], _timeout: Duration) -> Result<String, VpnError> {
        self.record(argv, false);
        if argv.iter().any(|a| a == "--json") {
            self.status_json
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| VpnError::ProcessExecution {
                    program: argv[0].clone(),
                    message: "timed out after 5s".to_string(),
                })
        } else {
            Ok(self.status_text.lock().unwrap().clone())
        }
    }
}

#[derive(Default)]
pub struct RecordingBrowser {
    pub opened: Mutex<Vec<String>>,
}

impl BrowserOpener for RecordingBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }
}

pub struct FixedCounters;

impl InterfaceCounters for FixedCounters {
    fn sample(&self) -> Option<TelemetrySample> {
        Some(TelemetrySample {
            taken_at: Local::now(),
            bytes_sent: 1_000,
            bytes_recv: 2_000,
        })
    }
}

/// A session context wired to fakes inside a temporary directory.
pub struct Harness {
    pub dir: TempDir,
    pub tailscale: Arc<FakeTailscale>,
    pub browser: Arc<RecordingBrowser>,
    pub ctx: SessionContext,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(|_| {})
    }

    pub fn with_settings(adjust: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let tailscale = Arc::new(FakeTailscale::default());
        let browser = Arc::new(RecordingBrowser::default());

        let mut settings = Settings {
            status_method: StatusMethod::Json,
            service_start_delay_ms: 0,
            connect_timeout_secs: 2,
            poll_interval_secs: 1,
            telemetry_interval_secs: 60,
            ..Settings::default()
        };
        adjust(&mut settings);

        let cipher = Arc::new(KeyCipher::from_passphrase("integration").unwrap());
        let ctx = SessionContext {
            runner: tailscale.clone(),
            cli: TailscaleCli::new("tailscale"),
            profiles: Arc::new(FileProfileStore::new(dir.path().join("data"), cipher)),
            traffic: Arc::new(SqliteTrafficStore::open(dir.path().join("traffic_stats.db")).unwrap()),
            counters: Arc::new(FixedCounters),
            browser: browser.clone(),
            events: Arc::new(EventHub::new()),
            settings,
        };

        Self {
            dir,
            tailscale,
            browser,
            ctx,
        }
    }
}

/// Everything published so far.
pub fn drain(events: &Receiver<ProfileEvent>) -> Vec<SessionEvent> {
    events.try_iter().map(|e| e.event).collect()
}

pub fn states(events: &[SessionEvent]) -> Vec<SessionState> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect()
}

pub fn outputs(events: &[SessionEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::Output(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}
