//! Data model shared across the bridge
//!
//! - [`Activity`]: what the transport delivers
//! - [`WebhookEvent`]: what destinations receive
//! - [`Credential`] / [`Identity`]: who a pipeline acts as

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// An access token. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential(***)")
    }
}

/// Result of a successful identity check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    #[serde(default)]
    pub id: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub emails: Vec<String>,
}

impl Identity {
    pub fn named<S: Into<String>>(display_name: S) -> Self {
        Self {
            id: None,
            display_name: display_name.into(),
            emails: Vec::new(),
        }
    }
}

/// Actor of an activity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub email_address: String,
    #[serde(default)]
    pub org_id: String,
}

/// Space the activity happened in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub id: String,
}

/// One inbound activity notification
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub verb: String,
    #[serde(default)]
    pub actor: Option<Actor>,
    #[serde(default)]
    pub target: Option<Target>,
    #[serde(default)]
    pub published: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub object: Option<Value>,
    /// Undecoded envelope as received, used to recover the parent reference
    #[serde(default)]
    pub raw_data: Option<Value>,
}

impl Activity {
    /// Id of the parent activity (threaded replies), read from `activity.parent.id`
    pub fn parent_id(&self) -> Option<&str> {
        self.raw_data
            .as_ref()?
            .get("activity")?
            .get("parent")?
            .get("id")?
            .as_str()
    }

    /// Flat record describing the activity, as forwarded in `data`
    ///
    /// Keys are sorted, so two builds from the same activity serialize
    /// identically.
    pub fn event_data(&self) -> Value {
        let mut data = Map::new();
        data.insert("id".into(), Value::String(self.id.clone()));
        data.insert("verb".into(), Value::String(self.verb.clone()));

        if let Some(actor) = &self.actor {
            data.insert("actorId".into(), Value::String(actor.id.clone()));
            data.insert(
                "actorDisplayName".into(),
                Value::String(actor.display_name.clone()),
            );
            data.insert(
                "actorEmail".into(),
                Value::String(actor.email_address.clone()),
            );
            data.insert("actorOrgId".into(), Value::String(actor.org_id.clone()));
        }

        if let Some(target) = &self.target {
            data.insert("roomId".into(), Value::String(target.id.clone()));
        }

        if !self.published.is_empty() {
            data.insert("published".into(), Value::String(self.published.clone()));
        }

        if !self.content.is_empty() {
            data.insert("content".into(), Value::String(self.content.clone()));
        }

        if let Some(object) = &self.object {
            data.insert("object".into(), object.clone());
        }

        if let Some(parent_id) = self.parent_id() {
            data.insert("parentId".into(), Value::String(parent_id.to_string()));
        }

        Value::Object(data)
    }
}

/// Payload POSTed to every destination of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Correlates the per-destination log lines of one fan-out; not sent
    #[serde(skip)]
    pub id: Uuid,
    pub resource: String,
    pub event: String,
    pub data: Value,
    /// Milliseconds since the epoch, captured at translation
    pub timestamp: i64,
}

impl WebhookEvent {
    pub fn new<R: Into<String>, E: Into<String>>(
        resource: R,
        event: E,
        data: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource: resource.into(),
            event: event.into(),
            data,
            timestamp,
        }
    }

    /// Build the event for a translated activity, stamped with the current time
    pub fn from_activity(resource: &str, event: &str, activity: &Activity) -> Self {
        Self::new(
            resource,
            event,
            activity.event_data(),
            chrono::Utc::now().timestamp_millis(),
        )
    }

    /// Wire form: JSON indented with four spaces
    pub fn to_pretty_json(&self) -> serde_json::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(256);
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        Ok(buf)
    }
}
