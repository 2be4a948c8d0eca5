//! Resource catalog and verb translation
//!
//! The upstream feed tags every activity with a verb. This module holds the
//! process-wide tables that turn a verb into the `(resource, event)` vocabulary
//! webhook consumers see. Both tables are immutable after first use.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Sentinel event name matching every event of a resource
pub const ALL_EVENTS: &str = "all";

/// A category of webhook-relevant entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Unique key, e.g. `messages`
    pub name: &'static str,
    /// Short alias used for interactive selection
    pub alias: &'static str,
    /// Supported event names, including [`ALL_EVENTS`] where applicable
    pub events: &'static [&'static str],
}

impl Resource {
    /// Whether `event` is one of this resource's events (or the `all` sentinel)
    pub fn supports(&self, event: &str) -> bool {
        self.events.contains(&event)
    }

    /// Concrete event names, without the `all` sentinel
    pub fn concrete_events(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.events.iter().copied().filter(|e| *e != ALL_EVENTS)
    }
}

/// Target of a verb translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VerbMapping {
    pub resource: &'static str,
    pub event: &'static str,
}

/// Catalog in firehose order
pub static RESOURCES: &[Resource] = &[
    Resource {
        name: "rooms",
        alias: "r",
        events: &["all", "created", "updated"],
    },
    Resource {
        name: "messages",
        alias: "m",
        events: &["all", "created", "deleted"],
    },
    Resource {
        name: "memberships",
        alias: "mm",
        events: &["all", "created", "updated", "deleted"],
    },
    Resource {
        name: "attachmentActions",
        alias: "aa",
        events: &["created"],
    },
];

const fn to(resource: &'static str, event: &'static str) -> VerbMapping {
    VerbMapping { resource, event }
}

const VERBS: &[(&str, VerbMapping)] = &[
    ("post", to("messages", "created")),
    ("share", to("messages", "created")),
    ("delete", to("messages", "deleted")),
    ("create", to("rooms", "created")),
    ("update", to("rooms", "updated")),
    ("add", to("memberships", "created")),
    ("leave", to("memberships", "deleted")),
    ("remove", to("memberships", "deleted")),
    ("assignModerator", to("memberships", "updated")),
    ("unassignModerator", to("memberships", "updated")),
    ("cardAction", to("attachmentActions", "created")),
];

static VERB_TABLE: Lazy<HashMap<&'static str, VerbMapping>> =
    Lazy::new(|| VERBS.iter().copied().collect());

/// Look up a resource by name
pub fn resource(name: &str) -> Option<&'static Resource> {
    RESOURCES.iter().find(|r| r.name == name)
}

/// Look up a resource by its short alias
pub fn resource_by_alias(alias: &str) -> Option<&'static Resource> {
    RESOURCES.iter().find(|r| r.alias == alias)
}

/// Names of every catalog resource, in firehose order
pub fn resource_names() -> impl Iterator<Item = &'static str> {
    RESOURCES.iter().map(|r| r.name)
}

/// Translate an upstream verb. Unknown verbs are not of interest and yield `None`.
pub fn translate(verb: &str) -> Option<VerbMapping> {
    VERB_TABLE.get(verb).copied()
}

/// Every verb the bridge registers interest in
pub fn verbs() -> impl Iterator<Item = &'static str> {
    VERBS.iter().map(|(verb, _)| *verb)
}
