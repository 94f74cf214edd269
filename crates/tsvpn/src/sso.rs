//! Browser-based login for `tailscale up` without an auth key.
//!
//! The command prints a login link and blocks until the user finishes in the
//! browser (or the daemon gives up). Once it exits the daemon status is polled
//! until a connection shows up.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::browser::{match_login_url, BrowserOpener, OpenOnce};
use crate::error::VpnError;
use crate::process::CommandRunner;
use crate::status::StatusPoller;

pub struct SsoFlow {
    runner: Arc<dyn CommandRunner>,
    poller: Arc<StatusPoller>,
    browser: Arc<dyn BrowserOpener>,
    connect_timeout: Duration,
    poll_interval: Duration,
}

impl SsoFlow {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        poller: Arc<StatusPoller>,
        browser: Arc<dyn BrowserOpener>,
        connect_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            runner,
            poller,
            browser,
            connect_timeout,
            poll_interval,
        }
    }

    /// Runs the login command on the calling thread.
    ///
    /// Every output line goes to `on_output`. The first line that starts with
    /// `https://` and contains `url_fragment` is opened in the browser and
    /// then passed to `on_url`. A browser failure is reported through
    /// `on_output` and the flow carries on: the user can still copy the link.
    /// A login command that does not exit cleanly ends the flow with its error.
    pub fn run(
        &self,
        argv: &[String],
        elevate: bool,
        url_fragment: &str,
        on_output: &mut dyn FnMut(&str),
        on_url: &mut dyn FnMut(&str),
    ) -> Result<(), VpnError> {
        let mut once = OpenOnce::new(Arc::clone(&self.browser));
        let mut browser_errors = Vec::new();

        let output = self.runner.stream(argv, elevate, &mut |line| {
            on_output(line);
            if once.opened().is_some() {
                return;
            }
            if let Some(url) = match_login_url(line, url_fragment) {
                log::info!("SSO login URL detected");
                if let Err(e) = once.open(url) {
                    log::warn!("Failed to open browser: {}", e);
                    browser_errors.push(format!("Failed to open browser: {}", e));
                }
                on_url(url);
            }
        });

        for message in &browser_errors {
            on_output(message);
        }

        if let Some(e) = output.error(argv.first().map(String::as_str).unwrap_or_default()) {
            log::debug!("Login command ended with {:?}", output.outcome);
            return Err(e);
        }

        on_output("Waiting for Tailscale to connect...");
        if self
            .poller
            .wait_until_connected(self.connect_timeout, self.poll_interval)
        {
            on_output("Tailscale connected successfully.");
            Ok(())
        } else {
            Err(VpnError::PollingTimeout {
                waited: self.connect_timeout,
            })
        }
    }
}

/// Fire-and-forget variant of [`SsoFlow::run`] on its own thread.
///
/// Errors go to `on_error` when one is given, otherwise to `on_output`.
pub fn run_sso_login<O, E>(
    flow: Arc<SsoFlow>,
    argv: Vec<String>,
    url_fragment: String,
    mut on_output: O,
    on_error: Option<E>,
) -> thread::JoinHandle<()>
where
    O: FnMut(&str) + Send + 'static,
    E: FnMut(&str) + Send + 'static,
{
    thread::spawn(move || {
        let result = flow.run(&argv, false, &url_fragment, &mut on_output, &mut |_| {});
        if let Err(e) = result {
            let message = format!("SSO login error: {}", e);
            log::error!("{}", message);
            match on_error {
                Some(mut on_error) => on_error(&message),
                None => on_output(&message),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::tests::RecordingBrowser;
    use crate::config::StatusMethod;
    use crate::process::{ExitOutcome, ProcessOutput};
    use crate::tailscale::TailscaleCli;
    use std::sync::Mutex;

    /// Streams fixed lines for any command and answers status queries with
    /// `status_reply`.
    struct FakeUp {
        lines: Vec<&'static str>,
        status_reply: &'static str,
        exit: i32,
    }

    impl CommandRunner for FakeUp {
        fn execute(&self, _argv: &[String], _elevate: bool) -> ProcessOutput {
            unimplemented!()
        }

        fn stream(&self, _argv: &[String], _elevate: bool, on_line: &mut dyn FnMut(&str)) -> ProcessOutput {
            for line in &self.lines {
                on_line(line);
            }
            ProcessOutput {
                text: self.lines.join("\n"),
                outcome: ExitOutcome::Exited(self.exit),
                notice: None,
            }
        }

        fn query(&self, _argv: &[String], _timeout: Duration) -> Result<String, VpnError> {
            Ok(self.status_reply.to_string())
        }
    }

    fn flow(runner: FakeUp, browser: Arc<RecordingBrowser>) -> SsoFlow {
        let runner: Arc<dyn CommandRunner> = Arc::new(runner);
        let poller = StatusPoller::new(
            Arc::clone(&runner),
            TailscaleCli::new("tailscale"),
            StatusMethod::Text,
            Duration::from_secs(1),
        );
        SsoFlow::new(
            runner,
            Arc::new(poller),
            browser,
            Duration::from_millis(30),
            Duration::from_millis(10),
        )
    }

    fn up() -> Vec<String> {
        vec!["tailscale".to_string(), "up".to_string()]
    }

    #[test]
    fn opens_only_the_login_link() {
        let browser = Arc::new(RecordingBrowser::default());
        let flow = flow(
            FakeUp {
                lines: vec![
                    "See https://tailscale.com/kb for help",
                    "To authenticate, visit:",
                    "\thttps://hs.example.com/a/abc123",
                    "https://hs.example.com/a/abc123",
                ],
                status_reply: "100.64.0.2  laptop  user@  linux  -",
                exit: 0,
            },
            browser.clone(),
        );

        let mut urls = Vec::new();
        let result = flow.run(&up(), true, "/a/", &mut |_| {}, &mut |url| urls.push(url.to_string()));

        assert!(result.is_ok());
        assert_eq!(urls, ["https://hs.example.com/a/abc123"]);
        assert_eq!(
            browser.opened.lock().unwrap().as_slice(),
            ["https://hs.example.com/a/abc123"]
        );
    }

    #[test]
    fn never_connecting_is_a_timeout() {
        let flow = flow(
            FakeUp {
                lines: vec!["https://hs.example.com/a/abc123"],
                status_reply: "Logged out.",
                exit: 0,
            },
            Arc::default(),
        );
        let result = flow.run(&up(), false, "/a/", &mut |_| {}, &mut |_| {});
        assert!(matches!(result, Err(VpnError::PollingTimeout { .. })));
    }

    #[test]
    fn background_errors_fall_back_to_output() {
        let flow = Arc::new(flow(
            FakeUp {
                lines: vec![],
                status_reply: "Logged out.",
                exit: 0,
            },
            Arc::default(),
        ));
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = Arc::clone(&seen);

        run_sso_login(
            flow,
            up(),
            "/a/".to_string(),
            move |line: &str| sink.lock().unwrap().push(line.to_string()),
            None::<fn(&str)>,
        )
        .join()
        .unwrap();

        let seen = seen.lock().unwrap();
        assert!(seen.last().unwrap().starts_with("SSO login error:"));
    }

    #[test]
    fn failed_login_command_skips_polling() {
        let flow = flow(
            FakeUp {
                lines: vec!["backend error: invalid key"],
                status_reply: "100.64.0.2  laptop  user@  linux  -",
                exit: 1,
            },
            Arc::default(),
        );
        let result = flow.run(&up(), false, "/a/", &mut |_| {}, &mut |_| {});
        assert!(matches!(result, Err(VpnError::ProcessExecution { .. })));
    }

    #[test]
    fn browser_opens_before_the_url_is_reported() {
        let browser = Arc::new(RecordingBrowser::default());
        let flow = flow(
            FakeUp {
                lines: vec!["https://hs.example.com/a/abc123"],
                status_reply: "100.64.0.2  laptop  user@  linux  -",
                exit: 0,
            },
            browser.clone(),
        );

        let mut opened_first = false;
        flow.run(&up(), false, "/a/", &mut |_| {}, &mut |_| {
            opened_first = browser.opened.lock().unwrap().len() == 1;
        })
        .unwrap();
        assert!(opened_first);
    }
}
