//! External process execution.
//!
//! Every failure is converted at this boundary into text plus an
//! [`ExitOutcome`] and logged; callers on worker threads never see a raw
//! `io::Error`.

use std::io::{BufRead, BufReader, Read};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::browser::{BrowserOpener, OpenOnce};
use crate::config::Settings;
use crate::error::VpnError;

pub mod elevation;

pub use elevation::{select_elevation, AmbientElevation, Elevation, Prepared, WrapperElevation};

/// How a process invocation ended.
#[derive(Debug, Clone)]
pub enum ExitOutcome {
    Exited(i32),
    /// Killed by a signal (Unix), no exit code.
    Terminated,
    /// The elevation wrapper refused to run the command.
    ElevationDenied(i32),
    SpawnFailed(VpnError),
}

/// Result of one command execution: the combined stdout/stderr text and how it ended.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub text: String,
    pub outcome: ExitOutcome,
    /// Advisory text from the elevation strategy, if any.
    pub notice: Option<String>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ExitOutcome::Exited(0))
    }

    pub fn spawned(&self) -> bool {
        !matches!(self.outcome, ExitOutcome::SpawnFailed(_))
    }

    /// The error this outcome represents, if it is one.
    pub fn error(&self, program: &str) -> Option<VpnError> {
        match &self.outcome {
            ExitOutcome::Exited(0) => None,
            ExitOutcome::Exited(code) => Some(VpnError::ProcessExecution {
                program: program.to_string(),
                message: format!("exited with status {}", code),
            }),
            ExitOutcome::Terminated => Some(VpnError::ProcessExecution {
                program: program.to_string(),
                message: "terminated by a signal".to_string(),
            }),
            ExitOutcome::ElevationDenied(_) => Some(VpnError::Elevation {
                message: self.text.trim().to_string(),
            }),
            ExitOutcome::SpawnFailed(e) => Some(e.clone()),
        }
    }
}

/// Executes external commands. [`ProcessRunner`] is the real implementation;
/// tests substitute scripted runners.
pub trait CommandRunner: Send + Sync {
    /// Runs to completion and returns the combined output.
    fn execute(&self, argv: &[String], elevate: bool) -> ProcessOutput;

    /// Runs to completion, handing every output line to `on_line` as it arrives.
    /// No side effects beyond the callback.
    fn stream(&self, argv: &[String], elevate: bool, on_line: &mut dyn FnMut(&str))
        -> ProcessOutput;

    /// Like [`stream`](Self::stream), and additionally opens the first URL seen
    /// in the output in the browser (once per invocation).
    fn execute_streaming(
        &self,
        argv: &[String],
        elevate: bool,
        on_line: &mut dyn FnMut(&str),
    ) -> ProcessOutput {
        self.stream(argv, elevate, on_line)
    }

    /// Runs an unelevated query and returns its stdout, killing it once
    /// `timeout` has passed. Spawn failures and timeouts are errors.
    fn query(&self, argv: &[String], timeout: Duration) -> Result<String, VpnError>;
}

/// Which pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipe {
    Stdout,
    Stderr,
}

pub struct ProcessRunner {
    elevation: Arc<dyn Elevation>,
    browser: Arc<dyn BrowserOpener>,
    open_detected_urls: bool,
}

impl ProcessRunner {
    pub fn new(elevation: Arc<dyn Elevation>, browser: Arc<dyn BrowserOpener>) -> Self {
        Self {
            elevation,
            browser,
            open_detected_urls: true,
        }
    }

    /// Selects the platform elevation strategy from the settings.
    pub fn from_settings(settings: &Settings, browser: Arc<dyn BrowserOpener>) -> Self {
        let elevation = select_elevation(settings.escalation_tool.as_deref());
        log::debug!("Elevation strategy: {}", elevation.describe());
        Self::new(elevation, browser).with_url_opening(settings.open_detected_urls)
    }

    pub fn with_url_opening(mut self, enabled: bool) -> Self {
        self.open_detected_urls = enabled;
        self
    }

    fn prepare(&self, argv: &[String], elevate: bool) -> Prepared {
        if elevate {
            let prepared = self.elevation.prepare(argv.to_vec());
            if let Some(notice) = &prepared.notice {
                log::info!("{}", notice);
            }
            prepared
        } else {
            Prepared {
                argv: argv.to_vec(),
                notice: None,
                wrapped: false,
            }
        }
    }

    fn classify(&self, prepared: &Prepared, status: ExitStatus) -> ExitOutcome {
        match status.code() {
            Some(code) if prepared.wrapped && self.elevation.denied(code) => {
                log::warn!("Elevation was refused (exit code {})", code);
                ExitOutcome::ElevationDenied(code)
            }
            Some(code) => ExitOutcome::Exited(code),
            None => ExitOutcome::Terminated,
        }
    }
}

/// Builds a `Command` for `argv`, hiding the console window on Windows.
fn command(argv: &[String]) -> Command {
    let mut cmd = Command::new(&argv[0]);
    cmd.args(&argv[1..]);

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x08000000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd
}

/// Converts a spawn error into the error/text pair every caller reports.
fn spawn_failure(argv: &[String], err: std::io::Error) -> ProcessOutput {
    let error = spawn_error(argv, err);
    ProcessOutput {
        text: error.user_message(),
        outcome: ExitOutcome::SpawnFailed(error),
        notice: None,
    }
}

fn spawn_error(argv: &[String], err: std::io::Error) -> VpnError {
    let program = argv.first().cloned().unwrap_or_default();
    if err.kind() == std::io::ErrorKind::NotFound {
        log::error!("Command not found '{}': {}", argv.join(" "), err);
        VpnError::ProcessSpawn {
            program,
            message: err.to_string(),
        }
    } else {
        log::error!("Error running command '{}': {}", argv.join(" "), err);
        VpnError::ProcessExecution {
            program,
            message: err.to_string(),
        }
    }
}

fn empty_command() -> ProcessOutput {
    spawn_failure(
        &[],
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
    )
}

/// Reads `reader` line by line on its own thread, forwarding each line.
fn spawn_reader<R: Read + Send + 'static>(
    reader: R,
    pipe: Pipe,
    tx: Sender<(Pipe, String)>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if tx.send((pipe, line)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::debug!("Pipe read error ({:?}): {}", pipe, e);
                    break;
                }
            }
        }
    })
}

impl CommandRunner for ProcessRunner {
    fn execute(&self, argv: &[String], elevate: bool) -> ProcessOutput {
        if argv.is_empty() {
            return empty_command();
        }
        let prepared = self.prepare(argv, elevate);
        log::debug!("Executing: {}", crate::utils::mask_command(&prepared.argv));

        match command(&prepared.argv).stdin(Stdio::null()).output() {
            Ok(output) => {
                let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                text.push_str(&String::from_utf8_lossy(&output.stderr));
                ProcessOutput {
                    text,
                    outcome: self.classify(&prepared, output.status),
                    notice: prepared.notice,
                }
            }
            Err(e) => ProcessOutput {
                notice: prepared.notice,
                ..spawn_failure(&prepared.argv, e)
            },
        }
    }

    fn stream(
        &self,
        argv: &[String],
        elevate: bool,
        on_line: &mut dyn FnMut(&str),
    ) -> ProcessOutput {
        if argv.is_empty() {
            return empty_command();
        }
        let prepared = self.prepare(argv, elevate);
        log::debug!("Streaming: {}", crate::utils::mask_command(&prepared.argv));

        let mut child = match command(&prepared.argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ProcessOutput {
                    notice: prepared.notice,
                    ..spawn_failure(&prepared.argv, e)
                }
            }
        };

        let (tx, rx) = crossbeam_channel::unbounded();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, Pipe::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, Pipe::Stderr, tx.clone()));
        }
        drop(tx);

        let mut text = String::new();
        for (_, line) in rx.iter() {
            on_line(&line);
            text.push_str(&line);
            text.push('\n');
        }
        for reader in readers {
            let _ = reader.join();
        }

        let outcome = match child.wait() {
            Ok(status) => self.classify(&prepared, status),
            Err(e) => {
                log::error!("Failed waiting for '{}': {}", prepared.argv[0], e);
                ExitOutcome::SpawnFailed(VpnError::ProcessExecution {
                    program: prepared.argv[0].clone(),
                    message: e.to_string(),
                })
            }
        };

        ProcessOutput {
            text,
            outcome,
            notice: prepared.notice,
        }
    }

    fn execute_streaming(
        &self,
        argv: &[String],
        elevate: bool,
        on_line: &mut dyn FnMut(&str),
    ) -> ProcessOutput {
        if !self.open_detected_urls {
            return self.stream(argv, elevate, on_line);
        }

        let mut once = OpenOnce::new(Arc::clone(&self.browser));
        self.stream(argv, elevate, &mut |line| {
            if let Some(Err(e)) = once.scan(line) {
                log::warn!("Failed to open browser: {}", e);
            }
            on_line(line);
        })
    }

    fn query(&self, argv: &[String], timeout: Duration) -> Result<String, VpnError> {
        if argv.is_empty() {
            return Err(VpnError::ProcessSpawn {
                program: String::new(),
                message: "empty command".to_string(),
            });
        }
        let program = argv[0].clone();

        let mut child = command(argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_error(argv, e))?;

        let (tx, rx) = crossbeam_channel::unbounded();
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, Pipe::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, Pipe::Stderr, tx.clone());
        }
        drop(tx);

        let deadline = Instant::now() + timeout;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => break,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    log::debug!("'{}' timed out after {:?}", argv.join(" "), timeout);
                    return Err(VpnError::ProcessExecution {
                        program,
                        message: format!("timed out after {}s", timeout.as_secs()),
                    });
                }
                Ok(None) => thread::sleep(Duration::from_millis(50)),
                Err(e) => {
                    return Err(VpnError::ProcessExecution {
                        program,
                        message: e.to_string(),
                    })
                }
            }
        }

        let mut stdout = String::new();
        for (pipe, line) in rx.iter() {
            match pipe {
                Pipe::Stdout => {
                    stdout.push_str(&line);
                    stdout.push('\n');
                }
                Pipe::Stderr => log::debug!("{} stderr: {}", program, line),
            }
        }
        Ok(stdout)
    }
}
