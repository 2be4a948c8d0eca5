//! Per-pipeline subscription registry
//!
//! Each pipeline owns exactly one registry. The registry is read on the
//! transport's delivery path and written by `start`, so every access goes
//! through one mutex private to that pipeline.

use crate::catalog::ALL_EVENTS;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which events of a resource a pipeline forwards
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventFilter {
    All,
    Only(String),
}

impl EventFilter {
    /// Whether `event` passes this filter
    pub fn accepts(&self, event: &str) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Only(wanted) => wanted == event,
        }
    }

    pub fn is_all(&self) -> bool {
        matches!(self, EventFilter::All)
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventFilter::All => ALL_EVENTS,
            EventFilter::Only(event) => event,
        }
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::All
    }
}

impl From<&str> for EventFilter {
    /// An empty string means `all`
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == ALL_EVENTS {
            EventFilter::All
        } else {
            EventFilter::Only(value.to_string())
        }
    }
}

impl From<String> for EventFilter {
    fn from(value: String) -> Self {
        EventFilter::from(value.as_str())
    }
}

impl From<EventFilter> for String {
    fn from(filter: EventFilter) -> Self {
        filter.as_str().to_string()
    }
}

impl FromStr for EventFilter {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(EventFilter::from(s))
    }
}

impl fmt::Display for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource name to event filter, at most one filter per resource
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<BTreeMap<String, EventFilter>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the filter for `resource`. Returns the previous filter.
    pub fn subscribe(&self, resource: &str, filter: EventFilter) -> Option<EventFilter> {
        self.entries.lock().insert(resource.to_string(), filter)
    }

    /// True iff `resource` is subscribed and its filter accepts `event`
    pub fn matches(&self, resource: &str, event: &str) -> bool {
        self.entries
            .lock()
            .get(resource)
            .map_or(false, |filter| filter.accepts(event))
    }

    /// Snapshot of the active subscriptions, ordered by resource name
    pub fn active_resources(&self) -> Vec<(String, EventFilter)> {
        self.entries
            .lock()
            .iter()
            .map(|(resource, filter)| (resource.clone(), filter.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
