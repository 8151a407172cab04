//! Auth events for read-only consumers (cart badge, analytics, ...).
//!
//! Names and detail payloads match the DOM custom events other page scripts
//! already listen for.
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    engine::{Commit, Transition},
    models::{Source, UserRecord},
};

pub const AUTH_UPDATED: &str = "auth:updated";
pub const AUTH_LOGIN: &str = "auth:login";
pub const AUTH_LOGOUT: &str = "auth:logout";

const CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Updated {
        is_logged_in: bool,
        user_data: Option<UserRecord>,
        source: Source,
    },
    Login(UserRecord),
    Logout,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Detail<'a> {
    is_logged_in: bool,
    user_data: Option<&'a UserRecord>,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Updated { .. } => AUTH_UPDATED,
            SessionEvent::Login(_) => AUTH_LOGIN,
            SessionEvent::Logout => AUTH_LOGOUT,
        }
    }

    /// `{ isLoggedIn, userData }`, the payload every auth event carries.
    pub fn detail(&self) -> Value {
        let detail = match self {
            SessionEvent::Updated {
                is_logged_in,
                user_data,
                ..
            } => Detail {
                is_logged_in: *is_logged_in,
                user_data: user_data.as_ref(),
            },
            SessionEvent::Login(user) => Detail {
                is_logged_in: true,
                user_data: Some(user),
            },
            SessionEvent::Logout => Detail {
                is_logged_in: false,
                user_data: None,
            },
        };

        serde_json::to_value(detail).unwrap_or(Value::Null)
    }

    /// Events a commit produces, in dispatch order. A profile refresh of the
    /// same user produces none.
    pub(crate) fn for_commit(commit: &Commit) -> Vec<SessionEvent> {
        if commit.transition() == Transition::Refreshed {
            return Vec::new();
        }

        let fact = commit.fact();
        let mut events = vec![SessionEvent::Updated {
            is_logged_in: fact.is_authenticated(),
            user_data: fact.user().cloned(),
            source: fact.source(),
        }];

        match (commit.transition(), fact.user()) {
            (Transition::Login | Transition::Switched, Some(user)) => {
                events.push(SessionEvent::Login(user.clone()))
            }
            (Transition::Logout, _) => events.push(SessionEvent::Logout),
            _ => {}
        }

        events
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        debug!("Dispatching {}", event.name());

        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
