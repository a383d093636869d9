use std::collections::BTreeMap;

use serde_json::{Map, Value};

const KEY_NAME: &str = "protectedName";
const KEY_THEME: &str = "protectedTheme";
const KEY_PHOTO: &str = "protectedPhoto";
const KEY_NICKNAMES: &str = "protectedNicknames";
const KEY_TEMP_BANS: &str = "tempBans";

/// Typed view over the per-thread settings blob.
///
/// Keys this crate does not own are carried in `extra` and written back
/// untouched, so other features can share the same blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadSettings {
    pub protected_name: Option<String>,
    pub protected_theme: Option<String>,
    pub protected_photo: Option<String>,
    pub protected_nicknames: BTreeMap<String, String>,
    /// user id -> expiry, epoch milliseconds
    pub temp_bans: BTreeMap<String, i64>,
    pub extra: Map<String, Value>,
}

impl ThreadSettings {
    /// Lenient parse: malformed JSON gives empty settings, ill-typed fields are skipped.
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Self::default();
        };
        match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(map)) => Self::from_map(map),
            Ok(_) => {
                tracing::warn!("thread settings are not a JSON object; using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed thread settings; using defaults");
                Self::default()
            }
        }
    }

    fn from_map(mut map: Map<String, Value>) -> Self {
        let protected_name = take_string(&mut map, KEY_NAME);
        let protected_theme = take_string(&mut map, KEY_THEME);
        let protected_photo = take_string(&mut map, KEY_PHOTO);

        let mut protected_nicknames = BTreeMap::new();
        if let Some(Value::Object(raw)) = map.remove(KEY_NICKNAMES) {
            for (id, nick) in raw {
                let id = id.trim().to_string();
                if id.is_empty() {
                    continue;
                }
                let nick = nick.as_str().map(|s| s.trim().to_string()).unwrap_or_default();
                protected_nicknames.insert(id, nick);
            }
        }

        let mut temp_bans = BTreeMap::new();
        if let Some(Value::Object(raw)) = map.remove(KEY_TEMP_BANS) {
            for (id, until) in raw {
                let until = until.as_i64().or_else(|| until.as_f64().map(|f| f as i64));
                if let Some(until) = until {
                    temp_bans.insert(id, until);
                }
            }
        }

        Self {
            protected_name,
            protected_theme,
            protected_photo,
            protected_nicknames,
            temp_bans,
            extra: map,
        }
    }

    pub fn to_json(&self) -> String {
        let mut map = self.extra.clone();
        put_string(&mut map, KEY_NAME, self.protected_name.as_deref());
        put_string(&mut map, KEY_THEME, self.protected_theme.as_deref());
        put_string(&mut map, KEY_PHOTO, self.protected_photo.as_deref());
        if !self.protected_nicknames.is_empty() {
            let nicks = self
                .protected_nicknames
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect();
            map.insert(KEY_NICKNAMES.into(), Value::Object(nicks));
        }
        let bans = self
            .temp_bans
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        map.insert(KEY_TEMP_BANS.into(), Value::Object(bans));
        Value::Object(map).to_string()
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> Option<String> {
    match map.remove(key) {
        Some(Value::String(s)) => {
            let s = s.trim().to_string();
            (!s.is_empty()).then_some(s)
        }
        _ => None,
    }
}

fn put_string(map: &mut Map<String, Value>, key: &str, value: Option<&str>) {
    if let Some(v) = value {
        map.insert(key.into(), Value::String(v.to_string()));
    }
}
