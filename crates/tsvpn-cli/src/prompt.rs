use console::{Key, Term};
use dialoguer::Confirm;

/// Format a duration into a human-readable string like "1h 23m 45s".
pub(crate) fn format_duration(duration: std::time::Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format a byte count with binary units, e.g. "1.5 MiB".
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Reads a secret from the terminal, echoing `*`. Returns `None` on Ctrl+C
/// or Escape.
fn read_masked(prompt: &str) -> Option<String> {
    let term = Term::stderr();
    let _ = term.write_str(prompt);
    let _ = term.write_str(": ");
    let _ = term.flush();

    let mut secret = String::new();

    while let Ok(key) = term.read_key() {
        match key {
            Key::Enter => {
                let _ = term.write_line("");
                return Some(secret);
            }
            Key::Escape => break,
            Key::Backspace => {
                if !secret.is_empty() {
                    secret.pop();
                    let _ = term.clear_chars(1);
                    let _ = term.flush();
                }
            }
            Key::Char('\x03') => break,
            Key::Char(c) => {
                secret.push(c);
                let _ = term.write_str("*");
                let _ = term.flush();
            }
            _ => {}
        }
    }
    let _ = term.write_line("");
    None
}

/// Asks for the auth key of `profile`. An empty answer is an error.
pub(crate) fn auth_key(profile: &str) -> anyhow::Result<String> {
    let key = read_masked(&format!("Auth key for '{}'", profile))
        .ok_or_else(|| anyhow::anyhow!("cancelled"))?;
    let key = key.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("no auth key entered");
    }
    Ok(key)
}

pub(crate) fn confirm_removal(profile: &str) -> anyhow::Result<bool> {
    Ok(Confirm::new()
        .with_prompt(format!("Delete profile '{}' and its stored credentials?", profile))
        .default(false)
        .interact()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn durations() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3_725)), "1h 2m 5s");
    }

    #[test]
    fn bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }
}
