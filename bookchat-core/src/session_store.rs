//! Local chat history.
//!
//! Sessions live under a single key of an injected [`KeyValueStore`] as a
//! JSON array, capped at [`MAX_SESSIONS`] (most recently updated kept). The
//! store is a best-effort cache: read-modify-write without locking, last
//! writer wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::StoreError;
use crate::models::ChatSession;

pub const STORAGE_KEY: &str = "bookchat_chat_sessions";
pub const MAX_SESSIONS: usize = 50;

/// Minimal string key/value storage.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A poisoned map is still a valid map.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }
}

// ============================================================================
// FileStore
// ============================================================================

/// One `<key>.json` file per key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ============================================================================
// SessionStore
// ============================================================================

pub struct SessionStore<K: KeyValueStore> {
    kv: K,
}

impl<K: KeyValueStore> SessionStore<K> {
    pub fn new(kv: K) -> Self {
        Self { kv }
    }

    pub fn kv(&self) -> &K {
        &self.kv
    }

    /// All stored sessions. Missing, unreadable or corrupt data reads as empty.
    pub fn load_sessions(&self) -> Vec<ChatSession> {
        let stored = match self.kv.get(STORAGE_KEY) {
            Ok(Some(s)) => s,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "Error loading sessions from store");
                return Vec::new();
            }
        };

        match serde_json::from_str(&stored) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::error!(error = %e, "Stored sessions are corrupt; starting empty");
                Vec::new()
            }
        }
    }

    /// Persist `sessions`, most recently updated first, keeping at most
    /// [`MAX_SESSIONS`].
    pub fn save_sessions(&self, mut sessions: Vec<ChatSession>) -> Result<(), StoreError> {
        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        sessions.truncate(MAX_SESSIONS);

        let json = serde_json::to_string(&sessions)?;
        self.kv.set(STORAGE_KEY, &json)
    }

    pub fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        self.load_sessions()
            .into_iter()
            .find(|s| s.session_id == session_id)
    }

    /// Replace the stored session with the same id, or add it.
    pub fn save_session(&self, session: &ChatSession) -> Result<(), StoreError> {
        let mut sessions = self.load_sessions();
        match sessions
            .iter_mut()
            .find(|s| s.session_id == session.session_id)
        {
            Some(existing) => *existing = session.clone(),
            None => sessions.push(session.clone()),
        }
        self.save_sessions(sessions)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let sessions: Vec<ChatSession> = self
            .load_sessions()
            .into_iter()
            .filter(|s| s.session_id != session_id)
            .collect();
        self.save_sessions(sessions)
    }

    /// Drop the whole history.
    pub fn clear(&self) -> Result<(), StoreError> {
        self.kv.remove(STORAGE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;

    fn session(id: &str, updated_at: i64, content: &str) -> ChatSession {
        let mut s = ChatSession::new(id, updated_at);
        s.messages.push(Message::user(content));
        s
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let store = SessionStore::new(MemoryStore::new());
        assert!(store.load_sessions().is_empty());
        assert!(store.get_session("s1").is_none());
    }

    #[test]
    fn test_save_twice_keeps_single_latest_entry() {
        let store = SessionStore::new(MemoryStore::new());
        store.save_session(&session("s1", 1, "first")).unwrap();
        store.save_session(&session("s1", 2, "second")).unwrap();

        let sessions = store.load_sessions();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].messages[0].content, "second");
        assert_eq!(store.get_session("s1").unwrap().updated_at, 2);
    }

    #[test]
    fn test_delete_removes_session() {
        let store = SessionStore::new(MemoryStore::new());
        store.save_session(&session("s1", 1, "a")).unwrap();
        store.save_session(&session("s2", 2, "b")).unwrap();

        store.delete_session("s1").unwrap();

        let ids: Vec<String> = store.load_sessions().into_iter().map(|s| s.session_id).collect();
        assert_eq!(ids, vec!["s2".to_string()]);
    }

    #[test]
    fn test_delete_unknown_is_noop() {
        let store = SessionStore::new(MemoryStore::new());
        store.save_session(&session("s1", 1, "a")).unwrap();
        store.delete_session("nope").unwrap();
        assert_eq!(store.load_sessions().len(), 1);
    }

    #[test]
    fn test_cap_keeps_most_recently_updated() {
        let store = SessionStore::new(MemoryStore::new());
        let sessions: Vec<ChatSession> = (0..60)
            .map(|i| session(&format!("s{}", i), i as i64, "x"))
            .collect();
        store.save_sessions(sessions).unwrap();

        let loaded = store.load_sessions();
        assert_eq!(loaded.len(), MAX_SESSIONS);
        assert_eq!(loaded[0].session_id, "s59");
        assert!(loaded.iter().all(|s| s.updated_at >= 10), "oldest ten evicted");
    }

    #[test]
    fn test_corrupt_data_loads_empty() {
        let kv = MemoryStore::new();
        kv.set(STORAGE_KEY, "{not json").unwrap();
        let store = SessionStore::new(kv);
        assert!(store.load_sessions().is_empty());

        // Saving over corrupt data recovers.
        store.save_session(&session("s1", 1, "a")).unwrap();
        assert_eq!(store.load_sessions().len(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let store = SessionStore::new(MemoryStore::new());
        store.save_session(&session("s1", 1, "a")).unwrap();
        store.clear().unwrap();
        assert!(store.load_sessions().is_empty());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = std::env::temp_dir().join(format!("bookchat-store-{}", uuid::Uuid::new_v4()));
        let kv = FileStore::new(&dir);

        assert!(kv.get("missing").unwrap().is_none());
        kv.set("k", "v1").unwrap();
        kv.set("k", "v2").unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("v2"));
        kv.remove("k").unwrap();
        kv.remove("k").unwrap();
        assert!(kv.get("k").unwrap().is_none());

        let store = SessionStore::new(FileStore::new(&dir));
        store.save_session(&session("s1", 1, "persisted")).unwrap();
        let reopened = SessionStore::new(FileStore::new(&dir));
        assert_eq!(reopened.get_session("s1").unwrap().messages[0].content, "persisted");

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let kv = FileStore::new("/tmp/bookchat");
        assert_eq!(kv.path_for("../etc/passwd"), PathBuf::from("/tmp/bookchat/___etc_passwd.json"));
    }
}
