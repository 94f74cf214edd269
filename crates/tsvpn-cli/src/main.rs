//! # tsvpn
//!
//! Terminal front end for the tsvpn connection supervisor: manage profiles,
//! connect with an auth key or browser SSO, and inspect status and traffic.

mod args;
mod observer;
mod prompt;

use std::process::ExitCode;
use std::time::Instant;

use args::{Args, Commands, ProfileCommand};
use chrono::Local;
use clap::Parser;
use console::Style;
use crossbeam_channel::{never, select, Receiver};
use log::{error, info, warn};
use observer::CliObserver;
use tsvpn::events::dispatch;
use tsvpn::status::StatusPoller;
use tsvpn::{
    init_logger, rotate_log, AcquireOutcome, AppPaths, AuthMode, ConnectOutcome, ProfileEvent,
    SessionContext, SessionManager, Settings, SingleInstanceGuard, TaskHandle,
};

/// The main entry point of the application.
fn main() -> ExitCode {
    let args = Args::parse();

    let paths = match AppPaths::resolve().and_then(|p| p.ensure().map(|_| p)) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let log_file = args.log_file.then(|| paths.log_file());
    if let Some(file) = &log_file {
        rotate_log(file);
    }
    init_logger(args.level.into(), log_file.as_deref());

    // Ensure only one instance is running
    let mut guard = SingleInstanceGuard::new(paths.lock_file());
    match guard.acquire() {
        AcquireOutcome::Acquired => {}
        AcquireOutcome::HeldByOther => {
            error!("Another instance of tsvpn is already running.");
            return ExitCode::FAILURE;
        }
        AcquireOutcome::Error(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    }

    let code = match run(args.command, &paths) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    };

    guard.release();
    code
}

fn run(command: Commands, paths: &AppPaths) -> anyhow::Result<ExitCode> {
    let settings_path = paths.settings_file();
    let mut settings = Settings::load(&settings_path);
    let manager = SessionManager::new(SessionContext::system(settings.clone(), paths)?);

    match command {
        Commands::Profile(cmd) => profile(&manager, &settings, cmd),
        Commands::Connect {
            profile,
            key,
            url,
            detach,
        } => {
            let name = resolve_profile(&manager, &settings, profile)?;
            let mode = manager.context().profiles.load_auth_mode(&name);
            let key = match key {
                Some(key) => Some(key),
                None if mode == AuthMode::KeyAuth
                    && manager.context().profiles.load_key(&name)?.is_empty() =>
                {
                    Some(prompt::auth_key(&name)?)
                }
                None => None,
            };

            let events = manager.events().subscribe();
            let task = manager.connect(&name, key.as_deref(), url.as_deref())?;
            settings.last_profile = Some(name.clone());
            settings.save(&settings_path)?;
            foreground(&manager, &name, task, events, detach)
        }
        Commands::Disconnect { profile } => {
            let name = resolve_profile(&manager, &settings, profile)?;
            let observer = CliObserver::new();
            let events = manager.events().subscribe();
            let task = manager.disconnect(&name)?;
            wait_rendering(&events, &observer, &task, &never());
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { json } => status(&manager, &settings, json),
        Commands::Traffic { profile } => traffic(&manager, profile),
        Commands::Settings {
            auto_connect,
            status_method,
            tailscale_path,
            escalation_tool,
        } => {
            let changed = auto_connect.is_some()
                || status_method.is_some()
                || tailscale_path.is_some()
                || escalation_tool.is_some();
            if let Some(value) = auto_connect {
                settings.auto_connect = value;
            }
            if let Some(method) = status_method {
                settings.status_method = method.into();
            }
            if let Some(path) = tailscale_path {
                settings.tailscale_path = path;
            }
            if let Some(tool) = escalation_tool {
                settings.escalation_tool = (!tool.is_empty()).then_some(tool);
            }
            if changed {
                settings.save(&settings_path)?;
                info!("Settings saved to {}", settings_path.display());
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Auto { detach } => {
            let events = manager.events().subscribe();
            match manager.auto_connect() {
                None => {
                    info!("Auto-connect is disabled or no profile exists.");
                    Ok(ExitCode::SUCCESS)
                }
                Some(task) => {
                    let task = task?;
                    let name = manager
                        .states()
                        .into_iter()
                        .find(|(_, state)| state.is_active())
                        .map(|(name, _)| name)
                        .unwrap_or_default();
                    foreground(&manager, &name, task, events, detach)
                }
            }
        }
    }
}

fn resolve_profile(
    manager: &SessionManager,
    settings: &Settings,
    requested: Option<String>,
) -> anyhow::Result<String> {
    if let Some(name) = requested {
        return Ok(name);
    }
    let profiles = manager.context().profiles.list_profiles()?;
    settings
        .last_profile
        .clone()
        .filter(|last| profiles.contains(last))
        .or_else(|| profiles.first().cloned())
        .ok_or_else(|| anyhow::anyhow!("no profiles yet; create one with `tsvpn profile add`"))
}

fn profile(manager: &SessionManager, settings: &Settings, cmd: ProfileCommand) -> anyhow::Result<ExitCode> {
    let store = &manager.context().profiles;
    match cmd {
        ProfileCommand::Add { name, url, key, sso } => {
            let name = tsvpn::profile::sanitize_profile_name(&name)?;
            store.save_url(&name, &url)?;
            if sso {
                manager.set_auth_mode(&name, AuthMode::Sso)?;
            } else {
                let key = match key {
                    Some(key) => key,
                    None => prompt::auth_key(&name)?,
                };
                store.save_key(&name, &key)?;
                manager.set_auth_mode(&name, AuthMode::KeyAuth)?;
            }
            info!("Profile '{}' saved.", name);
        }
        ProfileCommand::List => {
            let profiles = store.list_profiles()?;
            if profiles.is_empty() {
                println!("No profiles.");
            }
            let bold = Style::new().bold();
            for name in profiles {
                let marker = if settings.last_profile.as_deref() == Some(name.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {:<20} {:<10} {}",
                    marker,
                    bold.apply_to(&name),
                    store.load_auth_mode(&name).to_string(),
                    store.load_url(&name)?
                );
            }
        }
        ProfileCommand::Remove { name, yes } => {
            if !yes && !prompt::confirm_removal(&name)? {
                return Ok(ExitCode::SUCCESS);
            }
            manager.remove_profile(&name)?;
            info!("Profile '{}' removed.", name);
        }
        ProfileCommand::Mode { name, mode } => {
            let mode: AuthMode = mode.into();
            manager.set_auth_mode(&name, mode)?;
            info!("Profile '{}' now uses {}.", name, mode);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn status(manager: &SessionManager, settings: &Settings, json: bool) -> anyhow::Result<ExitCode> {
    let ctx = manager.context();
    if json {
        let raw = ctx
            .runner
            .query(&ctx.cli.status_json(), settings.status_query_timeout())?;
        println!("{}", raw.trim_end());
        return Ok(ExitCode::SUCCESS);
    }

    let poller = StatusPoller::from_settings(ctx.runner.clone(), ctx.cli.clone(), settings);
    if poller.is_connected_now() {
        println!("{}", Style::new().green().bold().apply_to("Connected"));
        Ok(ExitCode::SUCCESS)
    } else {
        println!("{}", Style::new().red().bold().apply_to("Disconnected"));
        Ok(ExitCode::from(3))
    }
}

fn traffic(manager: &SessionManager, only: Option<String>) -> anyhow::Result<ExitCode> {
    let store = &manager.context().traffic;
    let profiles = match only {
        Some(name) => vec![tsvpn::profile::sanitize_profile_name(&name)?],
        None => manager.context().profiles.list_profiles()?,
    };
    let today = Local::now().date_naive();

    for name in profiles {
        let (sent, recv) = store.daily_total(&name, today)?;
        match store.latest(&name)? {
            Some(last) => println!(
                "{:<20} today: ↑ {} ↓ {}   last sample {} (↑ {} ↓ {})",
                name,
                prompt::format_bytes(sent),
                prompt::format_bytes(recv),
                last.timestamp.format("%Y-%m-%d %H:%M:%S"),
                prompt::format_bytes(last.bytes_sent),
                prompt::format_bytes(last.bytes_recv),
            ),
            None => println!("{:<20} no samples", name),
        }
    }
    Ok(ExitCode::SUCCESS)
}

enum Waited<T> {
    Done(T),
    Interrupted,
    /// The worker died without reporting.
    Lost,
}

/// Renders events until `task` reports or `interrupts` fires.
fn wait_rendering<T>(
    events: &Receiver<ProfileEvent>,
    observer: &CliObserver,
    task: &TaskHandle<T>,
    interrupts: &Receiver<()>,
) -> Waited<T> {
    loop {
        select! {
            recv(events) -> event => {
                if let Ok(event) = event {
                    dispatch(observer, &event);
                }
            }
            recv(task.receiver()) -> result => {
                for event in events.try_iter() {
                    dispatch(observer, &event);
                }
                observer.clear();
                return match result {
                    Ok(value) => Waited::Done(value),
                    Err(_) => Waited::Lost,
                };
            }
            recv(interrupts) -> _ => return Waited::Interrupted,
        }
    }
}

/// Follows a connect to its end; once connected, waits for Ctrl+C and then
/// disconnects (unless `detach`). `events` must be subscribed before the
/// connect starts.
fn foreground(
    manager: &SessionManager,
    profile: &str,
    task: TaskHandle<ConnectOutcome>,
    events: Receiver<ProfileEvent>,
    detach: bool,
) -> anyhow::Result<ExitCode> {
    let (int_tx, interrupts) = crossbeam_channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = int_tx.try_send(());
    })?;

    let observer = CliObserver::new();

    match wait_rendering(&events, &observer, &task, &interrupts) {
        Waited::Done(ConnectOutcome::Connected) => {}
        Waited::Done(ConnectOutcome::Failed(e)) => {
            error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
        Waited::Done(ConnectOutcome::Superseded) => return Ok(ExitCode::SUCCESS),
        Waited::Lost => anyhow::bail!("connect worker stopped unexpectedly"),
        Waited::Interrupted => {
            warn!("Interrupted; disconnecting...");
            disconnect_and_wait(manager, profile, &events, &observer)?;
            return Ok(ExitCode::from(130));
        }
    }

    if detach {
        info!("Connected; the daemon stays up after tsvpn exits.");
        return Ok(ExitCode::SUCCESS);
    }

    let since = Instant::now();
    eprintln!(
        "{} Press Ctrl+C to disconnect.",
        Style::new().green().bold().apply_to("Connected.")
    );
    loop {
        select! {
            recv(events) -> event => {
                if let Ok(event) = event {
                    dispatch(&observer, &event);
                }
            }
            recv(interrupts) -> _ => break,
        }
    }

    disconnect_and_wait(manager, profile, &events, &observer)?;
    info!("Session lasted {}", prompt::format_duration(since.elapsed()));
    Ok(ExitCode::SUCCESS)
}

fn disconnect_and_wait(
    manager: &SessionManager,
    profile: &str,
    events: &Receiver<ProfileEvent>,
    observer: &CliObserver,
) -> anyhow::Result<()> {
    let task = manager.disconnect(profile)?;
    if let Waited::Lost = wait_rendering(events, observer, &task, &never()) {
        anyhow::bail!("disconnect worker stopped unexpectedly");
    }
    Ok(())
}
