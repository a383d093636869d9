use std::collections::HashMap;

use dashmap::DashMap;

use crate::transport::ThreadInfo;

/// Last-known nickname per (thread, participant). Empty string means no
/// nickname. Volatile; rebuilt from thread info on demand.
#[derive(Debug, Default)]
pub struct NicknameCache {
    threads: DashMap<String, HashMap<String, String>>,
}

impl NicknameCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread_id: &str, user_id: &str) -> String {
        self.threads
            .get(thread_id)
            .and_then(|m| m.get(user_id).cloned())
            .unwrap_or_default()
    }

    pub fn set(&self, thread_id: &str, user_id: &str, nickname: &str) {
        self.threads
            .entry(thread_id.to_string())
            .or_default()
            .insert(user_id.to_string(), nickname.trim().to_string());
    }

    /// Replace the whole thread map with a fresh read. Participants without
    /// a nickname are recorded as "".
    pub fn replace(&self, thread_id: &str, info: &ThreadInfo) {
        self.threads.insert(thread_id.to_string(), live_map(info));
    }

    /// Add participants not seen before; entries already known are kept, so a
    /// re-read cannot launder a change that has not been judged yet.
    pub fn absorb(&self, thread_id: &str, info: &ThreadInfo) {
        let mut known = self.threads.entry(thread_id.to_string()).or_default();
        for (id, nickname) in live_map(info) {
            known.entry(id).or_insert(nickname);
        }
    }

    /// Mark a thread warm without data, so a failed fetch is not retried per event.
    pub fn mark_empty(&self, thread_id: &str) {
        self.threads.entry(thread_id.to_string()).or_default();
    }

    pub fn clear(&self, thread_id: &str) {
        self.threads.remove(thread_id);
    }

    pub fn clear_all(&self) {
        self.threads.clear();
    }
}

fn live_map(info: &ThreadInfo) -> HashMap<String, String> {
    let mut map: HashMap<String, String> =
        info.participant_ids.iter().map(|id| (id.clone(), String::new())).collect();
    for (id, nickname) in &info.nicknames {
        map.insert(id.clone(), nickname.trim().to_string());
    }
    map
}
