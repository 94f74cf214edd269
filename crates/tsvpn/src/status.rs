//! Daemon status confirmation.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::config::{Settings, StatusMethod};
use crate::error::VpnError;
use crate::process::CommandRunner;
use crate::tailscale::TailscaleCli;

/// Marker printed by `tailscale status` when no node key is active.
pub const LOGGED_OUT_MARKER: &str = "Logged out";

#[derive(Debug, Deserialize)]
struct StatusDocument {
    #[serde(rename = "Peer", default)]
    peer: Option<std::collections::HashMap<String, PeerStatus>>,
}

#[derive(Debug, Deserialize)]
struct PeerStatus {
    #[serde(rename = "Online", default)]
    online: bool,
}

/// Parses `tailscale status --json` and reports whether any peer is online.
/// A missing or `null` `Peer` map means no peer is reachable.
pub fn parse_status_json(raw: &str) -> Result<bool, VpnError> {
    let doc: StatusDocument =
        serde_json::from_str(raw).map_err(|e| VpnError::ParsingAmbiguity {
            message: e.to_string(),
        })?;
    Ok(doc
        .peer
        .map(|peers| peers.values().any(|p| p.online))
        .unwrap_or(false))
}

/// Polling heuristic for `tailscale status` output: only the logged-out
/// marker counts.
pub fn text_says_logged_out(status: &str) -> bool {
    status.contains(LOGGED_OUT_MARKER)
}

/// Connect-time heuristic, broader than [`text_says_logged_out`].
pub fn text_says_not_connected(status: &str) -> bool {
    let lower = status.to_lowercase();
    ["logged out", "disconnected", "failed"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Polls the daemon until it reports a connection, or gives up.
pub struct StatusPoller {
    runner: Arc<dyn CommandRunner>,
    cli: TailscaleCli,
    method: StatusMethod,
    query_timeout: Duration,
}

impl StatusPoller {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        cli: TailscaleCli,
        method: StatusMethod,
        query_timeout: Duration,
    ) -> Self {
        Self {
            runner,
            cli,
            method,
            query_timeout,
        }
    }

    pub fn from_settings(runner: Arc<dyn CommandRunner>, cli: TailscaleCli, settings: &Settings) -> Self {
        Self::new(runner, cli, settings.status_method, settings.status_query_timeout())
    }

    /// Returns true as soon as one attempt does not look logged out.
    ///
    /// `timeout / interval` attempts are made with `interval` between them; a
    /// timeout shorter than the interval makes no query at all. A zero interval
    /// means a single attempt.
    pub fn wait_until_connected(&self, timeout: Duration, interval: Duration) -> bool {
        let attempts = if interval.is_zero() {
            1
        } else {
            (timeout.as_millis() / interval.as_millis()) as u64
        };

        for attempt in 1..=attempts {
            if self.is_connected_now() {
                log::info!("Daemon reports a connection (attempt {}/{})", attempt, attempts);
                return true;
            }
            log::debug!("Not connected yet (attempt {}/{})", attempt, attempts);
            if attempt < attempts {
                thread::sleep(interval);
            }
        }
        false
    }

    /// One check with the configured method. JSON falls back to the text
    /// heuristic when the structured status cannot be read.
    pub fn is_connected_now(&self) -> bool {
        match self.method {
            StatusMethod::Json => match self.check_connected() {
                Ok(connected) => connected,
                Err(e) => {
                    log::debug!("JSON status unavailable, falling back to text: {}", e);
                    !self.is_logged_out()
                }
            },
            StatusMethod::Text => !self.is_logged_out(),
        }
    }

    /// Runs `tailscale status`; a query that fails or times out counts as
    /// logged out.
    pub fn is_logged_out(&self) -> bool {
        match self.runner.query(&self.cli.status(), self.query_timeout) {
            Ok(text) => text_says_logged_out(&text),
            Err(e) => {
                log::debug!("Status query failed: {}", e);
                true
            }
        }
    }

    /// Verdict right after `tailscale up`. The text fallback uses
    /// [`text_says_not_connected`]; a failed query means not connected.
    pub fn verify_connected(&self) -> bool {
        if self.method == StatusMethod::Json {
            match self.check_connected() {
                Ok(connected) => return connected,
                Err(e) => log::debug!("JSON status unavailable, falling back to text: {}", e),
            }
        }
        match self.runner.query(&self.cli.status(), self.query_timeout) {
            Ok(text) => !text_says_not_connected(&text),
            Err(e) => {
                log::debug!("Status query failed: {}", e);
                false
            }
        }
    }

    /// Runs `tailscale status --json` and checks for an online peer.
    pub fn check_connected(&self) -> Result<bool, VpnError> {
        let raw = self.runner.query(&self.cli.status_json(), self.query_timeout)?;
        parse_status_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessOutput;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Answers queries from a script and counts them.
    #[derive(Default)]
    struct ScriptedQueries {
        replies: Mutex<VecDeque<Result<String, VpnError>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedQueries {
        fn with(replies: Vec<Result<String, VpnError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: Mutex::default(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl CommandRunner for ScriptedQueries {
        fn execute(&self, _argv: &[String], _elevate: bool) -> ProcessOutput {
            unimplemented!("status polling only queries")
        }

        fn stream(&self, _argv: &[String], _elevate: bool, _on_line: &mut dyn FnMut(&str)) -> ProcessOutput {
            unimplemented!("status polling only queries")
        }

        fn query(&self, argv: &[String], _timeout: Duration) -> Result<String, VpnError> {
            self.calls.lock().unwrap().push(argv.to_vec());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("Logged out.".to_string()))
        }
    }

    fn poller(runner: Arc<ScriptedQueries>, method: StatusMethod) -> StatusPoller {
        StatusPoller::new(runner, TailscaleCli::new("tailscale"), method, Duration::from_secs(5))
    }

    fn timed_out() -> VpnError {
        VpnError::ProcessExecution {
            program: "tailscale".to_string(),
            message: "timed out after 5s".to_string(),
        }
    }

    #[test]
    fn json_with_online_peer_is_connected() {
        assert!(parse_status_json(r#"{"Peer":{"p1":{"Online":true}}}"#).unwrap());
        assert!(!parse_status_json(r#"{"Peer":{"p1":{"Online":false}}}"#).unwrap());
    }

    #[test]
    fn json_without_peers_is_not_connected() {
        assert!(!parse_status_json(r#"{"Peer":null}"#).unwrap());
        assert!(!parse_status_json(r#"{"BackendState":"NeedsLogin"}"#).unwrap());
    }

    #[test]
    fn malformed_json_is_a_parsing_error() {
        assert!(matches!(
            parse_status_json("Logged out."),
            Err(VpnError::ParsingAmbiguity { .. })
        ));
    }

    #[test]
    fn text_heuristic() {
        assert!(text_says_logged_out("Logged out."));
        assert!(!text_says_logged_out("Tailscale is Disconnected"));
        assert!(!text_says_logged_out("100.64.0.1  laptop  user@  linux  -"));
    }

    #[test]
    fn connect_time_heuristic_is_broader() {
        assert!(text_says_not_connected("Logged out."));
        assert!(text_says_not_connected("Tailscale is Disconnected"));
        assert!(text_says_not_connected("health check failed"));
        assert!(!text_says_not_connected("100.64.0.1  laptop  user@  linux  -"));
    }

    #[test]
    fn polling_ignores_a_disconnected_line() {
        let runner = ScriptedQueries::with(vec![Ok("# Health check: Disconnected peer\n100.64.0.1  laptop".to_string())]);
        let poller = poller(runner.clone(), StatusMethod::Text);
        assert!(poller.wait_until_connected(Duration::from_millis(10), Duration::from_millis(10)));
        assert_eq!(runner.calls(), 1);
    }

    #[test]
    fn verification_rejects_a_disconnected_status() {
        let runner = ScriptedQueries::with(vec![Ok("Tailscale is Disconnected".to_string())]);
        assert!(!poller(runner, StatusMethod::Text).verify_connected());

        let runner = ScriptedQueries::with(vec![Err(timed_out())]);
        assert!(!poller(runner, StatusMethod::Text).verify_connected());
    }

    #[test]
    fn timeout_shorter_than_interval_makes_no_query() {
        let runner = ScriptedQueries::with(vec![]);
        let poller = poller(runner.clone(), StatusMethod::Text);
        assert!(!poller.wait_until_connected(Duration::from_millis(5), Duration::from_millis(10)));
        assert_eq!(runner.calls(), 0);
    }

    #[test]
    fn logged_out_keeps_polling_until_connected() {
        let runner = ScriptedQueries::with(vec![
            Ok("Logged out.".to_string()),
            Ok("Logged out.".to_string()),
            Ok("100.64.0.1  laptop  user@  linux  -".to_string()),
        ]);
        let poller = poller(runner.clone(), StatusMethod::Text);
        assert!(poller.wait_until_connected(Duration::from_millis(50), Duration::from_millis(10)));
        assert_eq!(runner.calls(), 3);
    }

    #[test]
    fn exhausted_attempts_return_false() {
        let runner = ScriptedQueries::with(vec![]);
        let poller = poller(runner.clone(), StatusMethod::Text);
        assert!(!poller.wait_until_connected(Duration::from_millis(30), Duration::from_millis(10)));
        assert_eq!(runner.calls(), 3);
    }

    #[test]
    fn failed_query_counts_as_logged_out() {
        let runner = ScriptedQueries::with(vec![Err(timed_out())]);
        assert!(poller(runner, StatusMethod::Text).is_logged_out());
    }

    #[test]
    fn zero_interval_is_a_single_attempt() {
        let runner = ScriptedQueries::with(vec![]);
        let poller = poller(runner.clone(), StatusMethod::Text);
        assert!(!poller.wait_until_connected(Duration::from_secs(1), Duration::ZERO));
        assert_eq!(runner.calls(), 1);
    }

    #[test]
    fn json_mode_uses_structured_status() {
        let runner = ScriptedQueries::with(vec![Ok(r#"{"Peer":{"p1":{"Online":true}}}"#.to_string())]);
        assert!(poller(runner.clone(), StatusMethod::Json).is_connected_now());
        assert_eq!(
            runner.calls.lock().unwrap()[0],
            ["tailscale", "status", "--json"]
        );
    }

    #[test]
    fn json_mode_falls_back_to_text() {
        let runner = ScriptedQueries::with(vec![
            Err(timed_out()),
            Ok("100.64.0.1  laptop  user@  linux  -".to_string()),
        ]);
        assert!(poller(runner.clone(), StatusMethod::Json).is_connected_now());
        assert_eq!(runner.calls.lock().unwrap()[1], ["tailscale", "status"]);
    }
}
