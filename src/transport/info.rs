use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use super::events::{id_from_value, str_field};

/// Live thread state as reported by `getThreadInfo`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadInfo {
    pub thread_id: String,
    pub name: String,
    pub theme: Option<String>,
    pub image_url: Option<String>,
    /// user id -> nickname ("" = none)
    pub nicknames: HashMap<String, String>,
    pub participant_ids: Vec<String>,
    pub admin_ids: Vec<String>,
    pub is_group: Option<bool>,
    pub is_canonical_user: bool,
}

impl ThreadInfo {
    /// Build from the transport's loosely shaped JSON. Field names differ
    /// between client versions, so several aliases are probed.
    pub fn from_value(v: &Value) -> Self {
        let nicknames = v
            .get("nicknames")
            .and_then(Value::as_object)
            .map(|m| {
                m.iter()
                    .filter_map(|(id, nick)| {
                        let id = id.trim();
                        (!id.is_empty()).then(|| {
                            (id.to_string(), nick.as_str().unwrap_or_default().trim().to_string())
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let ids = |key: &str| -> Vec<String> {
            v.get(key)
                .and_then(Value::as_array)
                .map(|list| {
                    list.iter()
                        .map(|item| match item {
                            // adminIDs come as [{"id": "..."}] in newer clients
                            Value::Object(o) => o.get("id").map(id_from_value).unwrap_or_default(),
                            other => id_from_value(other),
                        })
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        let non_empty = |s: String| (!s.is_empty()).then_some(s);

        Self {
            thread_id: v.get("threadID").map(id_from_value).unwrap_or_default(),
            name: str_field(v, &["threadName", "name"]),
            theme: non_empty(str_field(
                v,
                &["themeID", "theme_id", "theme_color", "threadTheme", "threadColor", "color"],
            )),
            image_url: non_empty(str_field(
                v,
                &["imageSrc", "thumbSrc", "thumbnailUrl", "threadImage", "picture"],
            )),
            nicknames,
            participant_ids: ids("participantIDs"),
            admin_ids: ids("adminIDs"),
            is_group: v.get("isGroup").and_then(Value::as_bool),
            is_canonical_user: v.get("isCanonicalUser").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    /// Group threads with more than two participants; one-to-one threads never qualify.
    pub fn is_enforceable_group(&self) -> bool {
        let count = self.participant_ids.len();
        let is_user_thread = self.is_canonical_user || count <= 2;
        let is_group_thread = self.is_group == Some(true) || count > 2;
        is_group_thread && !is_user_thread
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user_id)
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct UserInfo {
    #[serde(default)]
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn probes_aliases() {
        let info = ThreadInfo::from_value(&json!({
            "threadID": "1",
            "name": "Alpha",
            "color": "#FF0000",
            "thumbSrc": "https://cdn/x.jpg",
            "nicknames": {"2": " Bob ", "3": null},
            "participantIDs": ["2", "3", 4],
            "adminIDs": [{"id": "2"}, "9"],
            "isGroup": true
        }));
        assert_eq!(info.name, "Alpha");
        assert_eq!(info.theme.as_deref(), Some("#FF0000"));
        assert_eq!(info.image_url.as_deref(), Some("https://cdn/x.jpg"));
        assert_eq!(info.nicknames["2"], "Bob");
        assert_eq!(info.nicknames["3"], "");
        assert_eq!(info.participant_ids, vec!["2", "3", "4"]);
        assert!(info.is_admin("2") && info.is_admin("9"));
        assert!(info.is_enforceable_group());
    }

    #[test]
    fn two_person_thread_is_not_enforceable() {
        let info = ThreadInfo {
            participant_ids: vec!["1".into(), "2".into()],
            is_group: Some(true),
            ..Default::default()
        };
        assert!(!info.is_enforceable_group());
    }
}
