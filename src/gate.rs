use std::io;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::model::{Caller, UserId, UserProfile};

/// The external auth service: resolves session tokens and user display data.
#[async_trait]
pub trait AuthorizationGate: Send + Sync {
    /// The caller behind a session token, or `None` for an unknown/expired session.
    async fn session(&self, token: &str) -> Option<Caller>;

    async fn user(&self, id: &str) -> Option<UserProfile>;
}

#[derive(Debug, Default, Deserialize)]
struct Directory {
    #[serde(default)]
    users: Vec<UserProfile>,
    #[serde(default)]
    sessions: Vec<SessionEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEntry {
    token: String,
    user_id: UserId,
}

/// Gate backed by an in-process user directory and session table.
#[derive(Default)]
pub struct InMemoryGate {
    users: DashMap<UserId, UserProfile>,
    sessions: DashMap<String, UserId>,
}

impl InMemoryGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `{"users": [...], "sessions": [{"token", "userId"}]}`.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let directory: Directory = serde_json::from_str(json)?;
        let gate = Self::new();
        for user in directory.users {
            gate.insert_user(user);
        }
        for session in directory.sessions {
            gate.insert_session(session.token, session.user_id);
        }
        Ok(gate)
    }

    pub fn load(path: &Path) -> io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn insert_user(&self, profile: UserProfile) {
        self.users.insert(profile.id.clone(), profile);
    }

    pub fn insert_session(&self, token: impl Into<String>, user_id: impl Into<UserId>) {
        self.sessions.insert(token.into(), user_id.into());
    }

    pub fn revoke_session(&self, token: &str) {
        self.sessions.remove(token);
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl AuthorizationGate for InMemoryGate {
    async fn session(&self, token: &str) -> Option<Caller> {
        let user_id = self.sessions.get(token)?.value().clone();
        let role = self.users.get(&user_id)?.role;
        Some(Caller { user_id, role })
    }

    async fn user(&self, id: &str) -> Option<UserProfile> {
        self.users.get(id).map(|u| u.value().clone())
    }
}
