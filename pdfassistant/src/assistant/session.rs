//! The per-request UI loop.
//!
//! Every browser interaction runs [`handle_interaction`] once, top to bottom.
//! The only thing carried from one interaction to the next is the
//! [`SessionState`] of that browser session.

use enum_as_inner::EnumAsInner;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use super::dispatch::dispatch;
use super::markdown::render_markdown;
use super::resources::AssistantFactory;
use super::state::SessionState;

pub const TITLE: &str = "PDF Assistant";
pub const RESPONSE_HEADING: &str = "Assistant response";

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Interaction {
    /// Plain page load, nothing submitted.
    Render,
    /// The "Start New Session" button.
    NewSession,
    Submit(String),
}

/// What one pass renders.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct View {
    pub title: String,
    pub warning: Option<String>,
    pub heading: Option<String>,
    pub response: Option<String>,
    /// `response` rendered from markdown.
    pub response_html: Option<String>,
    pub error: Option<String>,
    pub run_id: Option<String>,
}

/// Runs one pass of the UI loop against `state`.
///
/// Errors from building the assistant (for example a knowledge base that
/// fails to load) are returned as-is. Errors from the assistant call itself
/// end up in [`View::error`] and leave the stored run id untouched.
pub async fn handle_interaction(
    state: &mut SessionState,
    interaction: Interaction,
    factory: &dyn AssistantFactory,
    user_id: &str,
) -> anyhow::Result<View> {
    let interaction = match interaction {
        Interaction::NewSession => {
            debug!(previous = ?state.run_id, "starting new session");
            state.run_id = None;
            Interaction::Render
        }
        other => other,
    };

    let mut assistant = factory.assistant(state.run_id.clone(), user_id).await?;

    let mut view = View {
        title: TITLE.to_string(),
        ..View::default()
    };

    if let Some(message) = interaction.as_submit().filter(|m| !m.trim().is_empty()) {
        match dispatch(assistant.as_mut(), message).await {
            Ok(reply) => {
                match assistant.run_id() {
                    Ok(run_id) => state.run_id = run_id,
                    Err(e) => debug!("assistant run id unavailable: {e}"),
                }
                view.heading = Some(RESPONSE_HEADING.to_string());
                view.response_html = Some(render_markdown(&reply));
                view.response = Some(reply);
            }
            Err(e) => {
                warn!("agent call failed: {e}");
                view.error = Some(format!("Agent call failed: {e}"));
            }
        }
    }

    view.run_id = state.run_id.clone();
    Ok(view)
}

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_MAX_SESSIONS: usize = 1000;

#[derive(Debug)]
struct SessionEntry {
    state: Arc<Mutex<SessionState>>,
    last_seen: Instant,
}

/// Session state per browser session key. Each session sits behind its own
/// lock so that passes of one session never overlap.
///
/// Keys are issued here, never taken from the client. Sessions idle for
/// longer than the TTL are dropped, and when the table is full the least
/// recently used session is evicted.
#[derive(Debug)]
pub struct SessionStates {
    sessions: RwLock<HashMap<String, SessionEntry>>,
    ttl: Duration,
    max_sessions: usize,
}

impl Default for SessionStates {
    fn default() -> Self {
        Self::with_limits(DEFAULT_SESSION_TTL, DEFAULT_MAX_SESSIONS)
    }
}

impl SessionStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            max_sessions: max_sessions.max(1),
        }
    }

    /// The session for a live `key`, or a new session under a freshly issued
    /// key when `key` is missing, unknown or expired.
    pub async fn session(&self, key: Option<&str>) -> (String, Arc<Mutex<SessionState>>) {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(key) = key {
            if let Some(entry) = sessions.get_mut(key) {
                if now.duration_since(entry.last_seen) < self.ttl {
                    entry.last_seen = now;
                    return (key.to_string(), Arc::clone(&entry.state));
                }
            }
        }

        let before = sessions.len();
        sessions.retain(|_, entry| now.duration_since(entry.last_seen) < self.ttl);
        while sessions.len() >= self.max_sessions {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_seen)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            sessions.remove(&oldest);
        }
        if sessions.len() < before {
            debug!(dropped = before - sessions.len(), "dropped sessions");
        }

        let key = Uuid::new_v4().to_string();
        let state = Arc::new(Mutex::new(SessionState::default()));
        sessions.insert(
            key.clone(),
            SessionEntry {
                state: Arc::clone(&state),
                last_seen: now,
            },
        );
        (key, state)
    }

    #[cfg(test)]
    pub(crate) async fn snapshot(&self, key: &str) -> Option<SessionState> {
        let state = Arc::clone(&self.sessions.read().await.get(key)?.state);
        let snapshot = state.lock().await.clone();
        Some(snapshot)
    }

    #[cfg(test)]
    pub(crate) async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
