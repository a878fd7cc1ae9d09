//! Chat sessions and the in-process session store
//!
//! Sessions carry conversation history and accumulated metadata
//! across turns. Persistence beyond the process lifetime is an
//! external collaborator's concern.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::message::{Message, Metadata};

/// Conversation state for one client session
#[derive(Debug, Clone)]
pub struct ChatSession {
    pub session_id: String,
    pub user_id: String,
    pub messages: Vec<Message>,
    /// Metadata accumulated across turns (markers survive between
    /// executions that reuse the session id)
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            metadata: Metadata::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// In-process session map shared between concurrent executions
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<String, ChatSession>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session id, creating the session if needed. A
    /// missing id gets a generated one.
    pub fn get_or_create(&self, session_id: Option<&str>, user_id: &str) -> String {
        let id = match session_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => format!("wf_session_{}", uuid::Uuid::new_v4()),
        };

        let mut sessions = self.sessions.lock().expect("session store poisoned");
        sessions
            .entry(id.clone())
            .or_insert_with(|| ChatSession::new(id.clone(), user_id));
        id
    }

    /// Append a message to a session's history and bump its clock
    pub fn append_message(&self, session_id: &str, message: Message) {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        if let Some(session) = sessions.get_mut(session_id) {
            session.messages.push(message);
            session.updated_at = Utc::now();
        }
    }

    /// Overwrite a session's accumulated metadata
    pub fn set_metadata(&self, session_id: &str, metadata: Metadata) {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        if let Some(session) = sessions.get_mut(session_id) {
            session.metadata = metadata;
            session.updated_at = Utc::now();
        }
    }

    pub fn get(&self, session_id: &str) -> Option<ChatSession> {
        let sessions = self.sessions.lock().expect("session store poisoned");
        sessions.get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session store poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_or_create_reuses_existing() {
        let store = SessionStore::new();
        let id = store.get_or_create(Some("s1"), "alice");
        assert_eq!(id, "s1");

        store.append_message("s1", Message::user("hello"));
        let again = store.get_or_create(Some("s1"), "alice");
        assert_eq!(again, "s1");
        assert_eq!(store.get("s1").unwrap().messages.len(), 1);
    }

    #[test]
    fn test_generated_session_id() {
        let store = SessionStore::new();
        let id = store.get_or_create(None, "anonymous");
        assert!(id.starts_with("wf_session_"));
        assert!(store.get(&id).is_some());
    }

    #[test]
    fn test_metadata_persists_across_turns() {
        let store = SessionStore::new();
        let id = store.get_or_create(Some("s2"), "bob");

        let mut meta = Metadata::new();
        meta.insert("safety_checked", true);
        store.set_metadata(&id, meta);

        let session = store.get(&id).unwrap();
        assert!(session.metadata.is_truthy("safety_checked"));
    }
}
