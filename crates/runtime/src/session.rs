//! Session management.

use crate::{Result, TrackerConfig};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use std::time::Duration;
use storage::{DurableQueue, SessionContext, SessionId};
use tracing::{debug, info};

/// State key holding the persistent ever id.
pub const EVER_ID_KEY: &str = "ever_id";
/// State key holding the opt-out flag, `"true"` when tracking is off.
pub const OPT_OUT_KEY: &str = "opt_out";

pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

struct State {
    context: SessionContext,
    last_activity: DateTime<Utc>,
    backgrounded_at: Option<DateTime<Utc>>,
    opt_out: bool,
}

/// Owns the session context stamped onto every event.
///
/// The ever id and opt-out flag persist in the queue's state area; the
/// session id is per process and rotates after `session_timeout` of
/// inactivity.
pub struct SessionManager {
    state: Mutex<State>,
    timeout: chrono::Duration,
}

impl SessionManager {
    /// Load persisted identity from `queue`, creating an ever id on first
    /// run.
    pub fn load(queue: &mut DurableQueue, config: &TrackerConfig) -> Result<Self> {
        Self::load_at(queue, config, Utc::now())
    }

    fn load_at(
        queue: &mut DurableQueue,
        config: &TrackerConfig,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let ever_id = match queue.get_state(EVER_ID_KEY)? {
            Some(id) => id,
            None => {
                let id = generate_ever_id(now);
                queue.put_state(EVER_ID_KEY, &id)?;
                info!(ever_id = %id, "created ever id");
                id
            }
        };
        let opt_out = queue.get_state(OPT_OUT_KEY)?.as_deref() == Some("true");

        let context = SessionContext {
            session_id: SessionId::new(),
            ever_id,
            started_at: now,
            app_version: config.app_version.clone(),
            sdk_version: SDK_VERSION.to_string(),
        };
        debug!(session_id = %context.session_id, opt_out, "session started");

        Ok(Self {
            state: Mutex::new(State {
                context,
                last_activity: now,
                backgrounded_at: None,
                opt_out,
            }),
            timeout: to_chrono(config.session_timeout()),
        })
    }

    /// Snapshot for a new event. Starts a new session first if the current
    /// one has been idle too long.
    pub fn current_context(&self) -> SessionContext {
        self.context_at(Utc::now())
    }

    pub(crate) fn context_at(&self, now: DateTime<Utc>) -> SessionContext {
        let mut state = self.state.lock();
        if now - state.last_activity > self.timeout {
            rotate(&mut state, now);
        }
        state.last_activity = now;
        state.context.clone()
    }

    /// The context without touching activity.
    pub fn peek(&self) -> SessionContext {
        self.state.lock().context.clone()
    }

    pub fn on_background(&self) {
        self.on_background_at(Utc::now());
    }

    pub(crate) fn on_background_at(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.backgrounded_at = Some(now);
        debug!(session_id = %state.context.session_id, "app backgrounded");
    }

    /// Returns `true` if a new session started.
    pub fn on_foreground(&self) -> bool {
        self.on_foreground_at(Utc::now())
    }

    pub(crate) fn on_foreground_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let Some(since) = state.backgrounded_at.take() else {
            return false;
        };
        if now - since > self.timeout {
            rotate(&mut state, now);
            state.last_activity = now;
            return true;
        }
        false
    }

    pub fn is_opted_out(&self) -> bool {
        self.state.lock().opt_out
    }

    pub(crate) fn set_opt_out(&self, opt_out: bool) {
        self.state.lock().opt_out = opt_out;
    }

    /// End the current session.
    pub fn end(&self) {
        let state = self.state.lock();
        let duration = Utc::now() - state.context.started_at;
        info!(
            session_id = %state.context.session_id,
            duration_secs = duration.num_seconds(),
            "session ended"
        );
    }
}

fn rotate(state: &mut State, now: DateTime<Utc>) {
    let previous = state.context.session_id;
    state.context.session_id = SessionId::new();
    state.context.started_at = now;
    info!(
        %previous,
        session_id = %state.context.session_id,
        "session timed out, starting a new one"
    );
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

/// `"6"`, ten digits of unix seconds, eight random digits.
fn generate_ever_id(now: DateTime<Utc>) -> String {
    let random: u32 = rand::thread_rng().gen_range(0..100_000_000);
    format!("6{:010}{:08}", now.timestamp().max(0), random)
}
