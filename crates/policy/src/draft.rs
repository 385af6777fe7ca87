use storage::{EventKind, ParamKey};

/// An event as the caller describes it, before validation.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: EventKind,
    pub params: Vec<(ParamKey, String)>,
}

impl EventDraft {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            params: Vec::new(),
        }
    }

    pub fn page(name: impl Into<String>) -> Self {
        Self::new(EventKind::page(name))
    }

    pub fn action(name: impl Into<String>) -> Self {
        Self::new(EventKind::action(name))
    }

    pub fn custom(name: impl Into<String>) -> Self {
        Self::new(EventKind::custom(name))
    }

    /// Append a parameter. Order is kept.
    pub fn param(mut self, key: impl Into<ParamKey>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<ParamKey>,
        V: Into<String>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }
}
