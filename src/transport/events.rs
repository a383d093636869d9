use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Event as delivered by the transport listener.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingEvent {
    Message(MessageEvent),
    Event(LogEvent),
    /// Replies, reactions, typing, presence… nothing here acts on them.
    #[serde(other)]
    Other,
}

impl IncomingEvent {
    pub fn thread_id(&self) -> Option<&str> {
        match self {
            IncomingEvent::Message(m) => Some(&m.thread_id),
            IncomingEvent::Event(e) => Some(&e.thread_id),
            IncomingEvent::Other => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessageEvent {
    #[serde(rename = "threadID", deserialize_with = "de_id")]
    pub thread_id: String,
    #[serde(rename = "senderID", default, deserialize_with = "de_id")]
    pub sender_id: String,
    #[serde(default, deserialize_with = "de_text")]
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(rename = "isGroup", default)]
    pub is_group: bool,
    /// mentioned user id -> mention text
    #[serde(default)]
    pub mentions: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Attachment {
    #[serde(rename = "ID", default, deserialize_with = "de_id")]
    pub id: String,
    #[serde(rename = "type", default, deserialize_with = "de_text")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogEvent {
    #[serde(rename = "threadID", deserialize_with = "de_id")]
    pub thread_id: String,
    #[serde(default, deserialize_with = "de_id")]
    pub author: String,
    #[serde(rename = "logMessageType", default, deserialize_with = "de_text")]
    pub log_message_type: String,
    #[serde(rename = "logMessageData", default)]
    pub log_message_data: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddedParticipant {
    pub user_id: String,
    pub full_name: String,
}

/// Thread-level change carried by a log event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadChange {
    Name { name: String },
    Theme { theme: String },
    Photo { url: String },
    Nickname { participant_id: String, nickname: String },
    Subscribe { added: Vec<AddedParticipant> },
    Unsubscribe { left: String },
    Other,
}

impl LogEvent {
    pub fn change(&self) -> ThreadChange {
        let data = &self.log_message_data;
        match self.log_message_type.as_str() {
            "log:thread-name" => ThreadChange::Name {
                name: str_field(data, &["name"]),
            },
            "log:thread-color" => ThreadChange::Theme {
                theme: str_field(data, &["theme_color", "theme_id", "themeID"]),
            },
            "log:thread-icon" => ThreadChange::Photo {
                url: str_field(data, &["profile_picture", "url"]),
            },
            "log:user-nickname" => ThreadChange::Nickname {
                participant_id: id_field(data, &["participant_id"]),
                nickname: str_field(data, &["nickname"]),
            },
            "log:subscribe" => {
                let added = data
                    .get("addedParticipants")
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|p| {
                                let user_id = id_field(p, &["userFbId"]);
                                (!user_id.is_empty()).then(|| AddedParticipant {
                                    full_name: str_field(p, &["fullName"]),
                                    user_id,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                ThreadChange::Subscribe { added }
            }
            "log:unsubscribe" => ThreadChange::Unsubscribe {
                left: id_field(data, &["leftParticipantFbId"]),
            },
            _ => ThreadChange::Other,
        }
    }
}

/// First non-empty string among `keys`, trimmed.
pub(crate) fn str_field(v: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn id_field(v: &Value, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| v.get(*k))
        .map(id_from_value)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

pub(crate) fn id_from_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

/// Ids arrive as strings or numbers depending on the transport version.
fn de_id<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(id_from_value(&Value::deserialize(d)?))
}

fn de_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(d)?.unwrap_or_default())
}
