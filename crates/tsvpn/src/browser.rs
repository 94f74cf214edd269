use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// `scheme://token...`: the first run of non-space characters after a scheme.
static URL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9+.\-]*://\S+").expect("valid URL regex"));

/// Opens URLs in the user's browser.
pub trait BrowserOpener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Delegates to the desktop's default handler.
pub struct SystemBrowser;

impl BrowserOpener for SystemBrowser {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        log::info!("Opening browser: {}", url);
        open::that_detached(url)?;
        Ok(())
    }
}

/// Returns the first URL found anywhere in `line`.
pub fn find_url(line: &str) -> Option<&str> {
    URL_PATTERN.find(line).map(|m| m.as_str())
}

/// Returns the trimmed line if it is an SSO login link: it must start with
/// `https://` and contain `fragment`.
pub fn match_login_url<'a>(line: &'a str, fragment: &str) -> Option<&'a str> {
    let trimmed = line.trim();
    (trimmed.starts_with("https://") && trimmed.contains(fragment)).then_some(trimmed)
}

/// Opens at most one URL for the lifetime of a single process invocation.
pub struct OpenOnce {
    browser: Arc<dyn BrowserOpener>,
    opened: Option<String>,
}

impl OpenOnce {
    pub fn new(browser: Arc<dyn BrowserOpener>) -> Self {
        Self {
            browser,
            opened: None,
        }
    }

    pub fn opened(&self) -> Option<&str> {
        self.opened.as_deref()
    }

    /// Scans `line` for any URL and opens the first one seen.
    pub fn scan(&mut self, line: &str) -> Option<anyhow::Result<()>> {
        if self.opened.is_some() {
            return None;
        }
        let url = find_url(line)?;
        Some(self.open(url))
    }

    /// Opens `url` unless a URL was already opened. A failed open still
    /// counts as the one attempt.
    pub fn open(&mut self, url: &str) -> anyhow::Result<()> {
        if self.opened.is_some() {
            return Ok(());
        }
        self.opened = Some(url.to_string());
        self.browser.open(url)
    }
}
