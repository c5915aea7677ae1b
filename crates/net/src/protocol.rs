//! Protocol message types and outbound command builders
//!
//! Every frame on the wire is JSON. Inbound frames share one outer
//! envelope: a type discriminant (`"c"` control / `"d"` data) wrapping an
//! opaque inner payload. Outbound commands are data frames addressing a
//! slash-delimited path, optionally carrying a positive reference that
//! requests acknowledgement.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Server identity announced once per connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    #[serde(rename = "ts")]
    pub timestamp: i64,
    #[serde(rename = "v")]
    pub version: String,
    #[serde(rename = "h")]
    pub host: String,
    #[serde(rename = "s")]
    pub session_id: String,
}

/// Correlates to a previously sent command by its reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acknowledgement {
    pub reference: u16,
    pub status: String,
}

impl Acknowledgement {
    /// Status reported for a command the server applied successfully.
    pub const OK: &'static str = "ok";

    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }
}

/// A session member. Fields are replaced wholesale on each update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Participant {
    pub id: String,
    #[serde(rename = "fullname")]
    pub full_name: String,
    #[serde(rename = "hasVoted")]
    pub has_voted: bool,
}

/// Online/offline status of a participant.
///
/// The id always comes from the addressed path, never from the payload.
/// `last_seen` is only known for offline notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Presence {
    pub id: String,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

/// One participant's numeric estimate for the active story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Vote {
    pub points: u16,
    pub user: Participant,
}

/// The currently active estimation round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Estimate {
    pub id: u16,
    pub title: String,
    pub status: String,
    pub results: HashMap<String, Vote>,
}

/// A story queued or played in the session. Status is an opaque string
/// at this layer ("queue", "active", ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Story {
    pub id: u16,
    pub title: String,
    pub status: String,
}

/// The full shared document, replaced wholesale on each snapshot.
///
/// Every field defaults so that a decode of an unrelated payload yields
/// `GameState::default()`, which the frame decoder uses to reject
/// snapshots that did not actually decode anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameState {
    pub deck: u64,
    pub description: String,
    pub estimate: Estimate,
    pub name: String,
    pub owner: Participant,
    pub participants: HashMap<String, Participant>,
    pub status: String,
    pub stories: HashMap<String, Story>,
}

/// Outer envelope shared by every inbound frame.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Frame {
    #[serde(rename = "t")]
    pub kind: String,
    #[serde(rename = "d")]
    pub data: Option<Value>,
}

/// Inner envelope of a control frame.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ControlFrame {
    #[serde(rename = "t")]
    pub kind: String,
    #[serde(rename = "d")]
    pub data: Option<Value>,
}

/// Inner record of a data frame.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DataFrame {
    #[serde(rename = "r")]
    pub reference: u16,
    #[serde(rename = "d")]
    pub data: Option<Value>,
    #[serde(rename = "b")]
    pub body: Option<Value>,
}

/// Body of a data frame: a path plus the raw payload addressed to it.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Body {
    #[serde(rename = "p")]
    pub path: String,
    #[serde(rename = "d")]
    pub data: Option<Value>,
    #[serde(rename = "s")]
    pub status: Option<String>,
}

/// Subscribe to updates below `path`.
pub fn listen(reference: u16, path: &str) -> String {
    json!({"t": "d", "d": {"r": reference, "a": "l", "b": {"p": path, "h": ""}}}).to_string()
}

/// Write `value` at `path`.
pub fn put(reference: u16, path: &str, value: Value) -> String {
    json!({"t": "d", "d": {"r": reference, "a": "p", "b": {"p": path, "d": value}}}).to_string()
}

/// Register a write the server applies when this connection drops.
pub fn on_disconnect_put(reference: u16, path: &str, value: Value) -> String {
    json!({"t": "d", "d": {"r": reference, "a": "o", "b": {"p": path, "d": value}}}).to_string()
}

/// Placeholder the server replaces with its own clock on write.
pub fn server_timestamp() -> Value {
    json!({".sv": "timestamp"})
}

/// The neutral keepalive frame. Carries no reference and is never
/// acknowledged.
pub fn keepalive() -> String {
    "0".to_string()
}
