//! Event types for the tracking queue.

use crate::params::{Param, ParamKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable event identifier. Sent with every delivery attempt so the
/// receiving side can drop duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EventId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Session state captured when an event is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub ever_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
    pub sdk_version: String,
}

impl SessionContext {
    /// Value of a reserved parameter for this session.
    pub fn reserved_value(&self, key: &ParamKey) -> Option<String> {
        match key {
            ParamKey::SessionId => Some(self.session_id.to_string()),
            ParamKey::EverId => Some(self.ever_id.clone()),
            _ => None,
        }
    }
}

/// What kind of occurrence was tracked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// A page or screen was shown.
    PageView { name: String },
    /// The user did something on a page.
    Action { name: String },
    /// Anything else the host wants to record.
    Custom { name: String },
}

impl EventKind {
    pub fn page(name: impl Into<String>) -> Self {
        Self::PageView { name: name.into() }
    }

    pub fn action(name: impl Into<String>) -> Self {
        Self::Action { name: name.into() }
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::PageView { name } | Self::Action { name } | Self::Custom { name } => name,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::PageView { .. } => "page_view",
            Self::Action { .. } => "action",
            Self::Custom { .. } => "custom",
        }
    }
}

/// A tracked event. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    #[serde(flatten)]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub params: Vec<Param>,
    pub session: SessionContext,
}

impl Event {
    /// Build an event from already-validated parameters.
    pub fn new(kind: EventKind, params: Vec<Param>, session: SessionContext) -> Self {
        Self {
            id: EventId::new(),
            kind,
            timestamp: Utc::now(),
            params,
            session,
        }
    }

    pub fn param(&self, key: &ParamKey) -> Option<&str> {
        self.params
            .iter()
            .find(|p| &p.key == key)
            .map(|p| p.value.as_str())
    }

    pub fn is_truncated(&self) -> bool {
        self.params.iter().any(|p| p.truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionContext {
        SessionContext {
            session_id: SessionId::new(),
            ever_id: "6000000000012345678".into(),
            started_at: Utc::now(),
            app_version: Some("1.2.0".into()),
            sdk_version: "0.1.0".into(),
        }
    }

    #[test]
    fn event_json_keeps_param_order() {
        let params = vec![
            Param::new(ParamKey::PageCategory(100), "blue"),
            Param::new(ParamKey::InternalSearch, "searching"),
            Param::new(ParamKey::Custom("alpha".into()), "a"),
        ];
        let event = Event::new(EventKind::page("product page"), params, session());
        let json = serde_json::to_string(&event).unwrap();

        let cg = json.find("cg100").unwrap();
        let is = json.find(r#""is""#).unwrap();
        let alpha = json.find("alpha").unwrap();
        assert!(cg < is && is < alpha);
        assert!(json.contains(r#""kind":"page_view""#));

        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn reserved_values_come_from_session() {
        let ctx = session();
        assert_eq!(
            ctx.reserved_value(&ParamKey::SessionId),
            Some(ctx.session_id.to_string())
        );
        assert_eq!(ctx.reserved_value(&ParamKey::EverId), Some(ctx.ever_id.clone()));
        assert_eq!(ctx.reserved_value(&ParamKey::InternalSearch), None);
    }

    #[test]
    fn kind_accessors() {
        let kind = EventKind::action("buy");
        assert_eq!(kind.name(), "buy");
        assert_eq!(kind.label(), "action");
    }
}
