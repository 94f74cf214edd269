use std::sync::Mutex;
use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};
use tsvpn::{ProgressStep, SessionObserver, StatusColor};

/// Renders session events on stderr with a spinner for long steps.
pub(crate) struct CliObserver {
    spinner: Mutex<Option<ProgressBar>>,
}

impl CliObserver {
    pub(crate) fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    /// Prints above the spinner without tearing it.
    fn print(&self, line: String) {
        match self.spinner.lock().unwrap().as_ref() {
            Some(spinner) => spinner.suspend(|| eprintln!("{}", line)),
            None => eprintln!("{}", line),
        }
    }

    fn start_spinner(&self, message: &str) {
        let mut slot = self.spinner.lock().unwrap();
        match slot.as_ref() {
            Some(spinner) => spinner.set_message(message.to_string()),
            None => {
                let spinner = ProgressBar::new_spinner();
                spinner.set_style(ProgressStyle::default_spinner());
                spinner.set_message(message.to_string());
                spinner.enable_steady_tick(Duration::from_millis(100));
                *slot = Some(spinner);
            }
        }
    }

    pub(crate) fn clear(&self) {
        if let Some(spinner) = self.spinner.lock().unwrap().take() {
            spinner.finish_and_clear();
        }
    }
}

impl SessionObserver for CliObserver {
    fn on_output(&self, _profile: &str, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        self.print(format!("{}", Style::new().dim().apply_to(line)));
    }

    fn on_status(&self, profile: &str, text: &str, color: StatusColor) {
        let style = match color {
            StatusColor::Red => Style::new().red().bold(),
            StatusColor::Yellow => Style::new().yellow().bold(),
            StatusColor::Green => Style::new().green().bold(),
        };
        self.print(format!("{} {}", style.apply_to("●"), style.apply_to(format!("{}: {}", profile, text))));
    }

    fn on_progress(&self, _profile: &str, message: &str, step: ProgressStep) {
        match step {
            ProgressStep::Started => self.start_spinner(message),
            ProgressStep::Completed => {
                self.print(format!("{} {}", Style::new().green().apply_to("✔"), message));
            }
            ProgressStep::Cleared => {
                self.clear();
                self.print(message.to_string());
            }
        }
    }

    fn on_message_popup(&self, _profile: &str, title: &str, body: &str) {
        let bold = Style::new().bold();
        let cyan = Style::new().cyan().bold();
        self.print(format!("{} {}\n{}", bold.apply_to(">>"), cyan.apply_to(title), body));
    }
}
