//! Policy configuration and enforcement.

use crate::{Error, EventDraft, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use storage::{Event, Param, ParamKey, SessionContext};
use tracing::debug;

const DEFAULT_MAX_VALUE_BYTES: usize = 255;
const DEFAULT_MAX_PARAMS: usize = 100;

/// Policy configuration loaded from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Parameter rules.
    #[serde(default)]
    pub params: ParamRules,
}

/// What happens when a caller supplies a reserved key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservedParamPolicy {
    /// Fail the `track` call with [`Error::ReservedParameter`].
    #[default]
    Reject,
    /// Drop the caller's value; the session value is sent instead.
    Override,
}

/// Rules applied to every parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParamRules {
    pub reserved: ReservedParamPolicy,

    /// Longer values are truncated and flagged.
    pub max_value_bytes: usize,

    pub max_params: usize,
}

impl Default for ParamRules {
    fn default() -> Self {
        Self {
            reserved: ReservedParamPolicy::default(),
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
            max_params: DEFAULT_MAX_PARAMS,
        }
    }
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// A policy that silently replaces reserved keys instead of failing.
    pub fn lenient() -> Self {
        Self {
            params: ParamRules {
                reserved: ReservedParamPolicy::Override,
                ..Default::default()
            },
        }
    }

    /// Validate a draft and stamp it with the session snapshot.
    pub fn admit(&self, draft: EventDraft, session: &SessionContext) -> Result<Event> {
        if draft.kind.name().trim().is_empty() {
            return Err(Error::EmptyName);
        }

        let rules = &self.params;
        if draft.params.len() > rules.max_params {
            return Err(Error::TooManyParams {
                count: draft.params.len(),
                max: rules.max_params,
            });
        }

        let mut params = Vec::with_capacity(draft.params.len());
        for (key, value) in draft.params {
            // A `Custom` spelling of a known key is the known key.
            let key = ParamKey::from(key.to_string());
            if key.is_empty() {
                return Err(Error::EmptyKey);
            }
            if key.is_reserved() {
                match rules.reserved {
                    ReservedParamPolicy::Reject => {
                        return Err(Error::ReservedParameter(key.to_string()));
                    }
                    ReservedParamPolicy::Override => {
                        debug!(%key, "ignoring caller value for reserved parameter");
                        continue;
                    }
                }
            }
            params.push(self.cap(key, value));
        }

        Ok(Event::new(draft.kind, params, session.clone()))
    }

    fn cap(&self, key: ParamKey, value: String) -> Param {
        let max = self.params.max_value_bytes;
        if value.len() <= max {
            return Param::new(key, value);
        }

        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        debug!(%key, len = value.len(), max, "truncating parameter value");
        Param {
            key,
            value: value[..end].to_string(),
            truncated: true,
        }
    }
}
