//! Parameter keys attached to tracked events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parameter key.
///
/// Indexed keys carry the slot number they are sent under, e.g.
/// `PageCategory(100)` is sent as `cg100`. Anything that does not spell a
/// known key is kept as [`ParamKey::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ParamKey {
    /// Current session id. Reserved.
    SessionId,
    /// Persistent per-installation id. Reserved.
    EverId,
    PageParam(u16),
    PageCategory(u16),
    SessionParam(u16),
    EventParam(u16),
    EcommerceParam(u16),
    UserCategory(u16),
    InternalSearch,
    MediaCode,
    Custom(String),
}

const INDEXED: &[(&str, fn(u16) -> ParamKey)] = &[
    ("cp", ParamKey::PageParam),
    ("cg", ParamKey::PageCategory),
    ("cs", ParamKey::SessionParam),
    ("ck", ParamKey::EventParam),
    ("cb", ParamKey::EcommerceParam),
    ("uc", ParamKey::UserCategory),
];

impl ParamKey {
    /// Keys filled in from the session context; callers may not set them.
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::SessionId | Self::EverId)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Custom(s) if s.trim().is_empty())
    }

    fn parse_indexed(s: &str) -> Option<Self> {
        INDEXED.iter().find_map(|(prefix, make)| {
            let digits = s.strip_prefix(prefix)?;
            if digits.is_empty() || digits.starts_with('0') {
                return None;
            }
            if !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            digits.parse().ok().map(make)
        })
    }
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionId => write!(f, "sid"),
            Self::EverId => write!(f, "eid"),
            Self::PageParam(n) => write!(f, "cp{n}"),
            Self::PageCategory(n) => write!(f, "cg{n}"),
            Self::SessionParam(n) => write!(f, "cs{n}"),
            Self::EventParam(n) => write!(f, "ck{n}"),
            Self::EcommerceParam(n) => write!(f, "cb{n}"),
            Self::UserCategory(n) => write!(f, "uc{n}"),
            Self::InternalSearch => write!(f, "is"),
            Self::MediaCode => write!(f, "mc"),
            Self::Custom(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for ParamKey {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s {
            "sid" => Self::SessionId,
            "eid" => Self::EverId,
            "is" => Self::InternalSearch,
            "mc" => Self::MediaCode,
            other => Self::parse_indexed(other)
                .unwrap_or_else(|| Self::Custom(other.to_string())),
        };
        Ok(key)
    }
}

impl From<String> for ParamKey {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(key) => key,
            Err(never) => match never {},
        }
    }
}

impl From<&str> for ParamKey {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<ParamKey> for String {
    fn from(key: ParamKey) -> Self {
        key.to_string()
    }
}

/// A single key/value parameter on an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub key: ParamKey,
    pub value: String,
    /// Set when the value was cut to the configured size limit.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl Param {
    pub fn new(key: ParamKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            truncated: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_keys_round_trip_through_strings() {
        for key in [
            ParamKey::PageCategory(100),
            ParamKey::PageParam(1),
            ParamKey::SessionParam(12),
            ParamKey::EventParam(7),
            ParamKey::EcommerceParam(3),
            ParamKey::UserCategory(250),
        ] {
            assert_eq!(ParamKey::from(key.to_string()), key);
        }
    }

    #[test]
    fn known_names_parse_to_typed_keys() {
        assert_eq!(ParamKey::from("sid"), ParamKey::SessionId);
        assert_eq!(ParamKey::from("eid"), ParamKey::EverId);
        assert_eq!(ParamKey::from("is"), ParamKey::InternalSearch);
        assert_eq!(ParamKey::from("cg100"), ParamKey::PageCategory(100));
    }

    #[test]
    fn malformed_indexed_keys_stay_custom() {
        assert_eq!(ParamKey::from("cg"), ParamKey::Custom("cg".into()));
        assert_eq!(ParamKey::from("cg01"), ParamKey::Custom("cg01".into()));
        assert_eq!(ParamKey::from("cgx"), ParamKey::Custom("cgx".into()));
        assert_eq!(ParamKey::from("cg70000"), ParamKey::Custom("cg70000".into()));
    }

    #[test]
    fn reserved_keys_cannot_hide_behind_custom() {
        assert!(ParamKey::from("sid").is_reserved());
        assert!(ParamKey::from("eid").is_reserved());
        assert!(!ParamKey::from("color").is_reserved());
    }

    #[test]
    fn keys_serialize_as_strings() {
        let param = Param::new(ParamKey::PageCategory(100), "blue");
        let json = serde_json::to_string(&param).unwrap();
        assert_eq!(json, r#"{"key":"cg100","value":"blue"}"#);

        let back: Param =
            serde_json::from_str(r#"{"key":"is","value":"q","truncated":true}"#).unwrap();
        assert_eq!(back.key, ParamKey::InternalSearch);
        assert!(back.truncated);
    }
}
