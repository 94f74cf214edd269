//! Session events and their fan-out to front ends.
//!
//! A session publishes every state change on an [`EventHub`]. Front ends
//! either read a subscribed channel directly or implement [`SessionObserver`]
//! and let [`spawn_dispatcher`] call it.

use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::session::SessionState;

/// Color class of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    Red,
    Yellow,
    Green,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStep {
    Started,
    Completed,
    /// The progress indicator should be dismissed.
    Cleared,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session entered this state. Published in transition order.
    StateChanged(SessionState),
    /// A line of command output or an informational message.
    Output(String),
    Status { text: String, color: StatusColor },
    Connected,
    LoggedOut,
    PostDisconnect,
    PostLogout,
    Progress { message: String, step: ProgressStep },
    MessagePopup { title: String, body: String },
}

/// An event and the profile whose session emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileEvent {
    pub profile: String,
    pub event: SessionEvent,
}

/// Broadcasts events to every live subscriber. Subscribers whose receiver
/// was dropped are forgotten on the next publish.
#[derive(Default)]
pub struct EventHub {
    subscribers: Mutex<Vec<Sender<ProfileEvent>>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<ProfileEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    pub fn publish(&self, profile: &str, event: SessionEvent) {
        let message = ProfileEvent {
            profile: profile.to_string(),
            event,
        };
        self.subscribers
            .lock()
            .unwrap()
            .retain(|tx| tx.send(message.clone()).is_ok());
    }

    pub fn output(&self, profile: &str, line: impl Into<String>) {
        self.publish(profile, SessionEvent::Output(line.into()));
    }

    pub fn status(&self, profile: &str, text: impl Into<String>, color: StatusColor) {
        self.publish(
            profile,
            SessionEvent::Status {
                text: text.into(),
                color,
            },
        );
    }

    pub fn progress(&self, profile: &str, message: impl Into<String>, step: ProgressStep) {
        self.publish(
            profile,
            SessionEvent::Progress {
                message: message.into(),
                step,
            },
        );
    }

    pub fn popup(&self, profile: &str, title: impl Into<String>, body: impl Into<String>) {
        self.publish(
            profile,
            SessionEvent::MessagePopup {
                title: title.into(),
                body: body.into(),
            },
        );
    }
}

/// Callback-style consumer of session events. Every method defaults to doing
/// nothing.
pub trait SessionObserver: Send + Sync {
    fn on_state_changed(&self, _profile: &str, _state: SessionState) {}
    fn on_output(&self, _profile: &str, _line: &str) {}
    fn on_status(&self, _profile: &str, _text: &str, _color: StatusColor) {}
    fn on_connected(&self, _profile: &str) {}
    fn on_logged_out(&self, _profile: &str) {}
    fn on_post_disconnect(&self, _profile: &str) {}
    fn on_post_logout(&self, _profile: &str) {}
    fn on_progress(&self, _profile: &str, _message: &str, _step: ProgressStep) {}
    fn on_message_popup(&self, _profile: &str, _title: &str, _body: &str) {}
}

/// Calls the observer method matching `event`.
pub fn dispatch(observer: &dyn SessionObserver, event: &ProfileEvent) {
    let profile = event.profile.as_str();
    match &event.event {
        SessionEvent::StateChanged(state) => observer.on_state_changed(profile, *state),
        SessionEvent::Output(line) => observer.on_output(profile, line),
        SessionEvent::Status { text, color } => observer.on_status(profile, text, *color),
        SessionEvent::Connected => observer.on_connected(profile),
        SessionEvent::LoggedOut => observer.on_logged_out(profile),
        SessionEvent::PostDisconnect => observer.on_post_disconnect(profile),
        SessionEvent::PostLogout => observer.on_post_logout(profile),
        SessionEvent::Progress { message, step } => observer.on_progress(profile, message, *step),
        SessionEvent::MessagePopup { title, body } => {
            observer.on_message_popup(profile, title, body)
        }
    }
}

/// Drives `observer` from `events` on a background thread until every
/// sender is gone.
pub fn spawn_dispatcher(
    events: Receiver<ProfileEvent>,
    observer: Arc<dyn SessionObserver>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        for event in events.iter() {
            dispatch(observer.as_ref(), &event);
        }
    })
}
