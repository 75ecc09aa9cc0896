use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::bbox::BBox;

/// Hard ceiling on stored chat messages per session (10 exchanges).
const MAX_MESSAGES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Everything remembered about one session between turns.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    pub session_id: String,
    pub query_count: u64,
    pub chat_history: VecDeque<ChatMessage>,
    pub last_bbox: Option<BBox>,
    pub last_collections: Vec<String>,
    pub has_rendered_map: bool,
    pub context_topics: Vec<String>,
}

impl ConversationContext {
    fn new(session_id: String) -> Self {
        ConversationContext {
            session_id,
            query_count: 0,
            chat_history: VecDeque::new(),
            last_bbox: None,
            last_collections: Vec::new(),
            has_rendered_map: false,
            context_topics: Vec::new(),
        }
    }

    /// Append one user/assistant exchange, evicting the oldest messages
    /// past the ring bound.
    pub fn record_exchange(&mut self, query: &str, reply: &str, now: DateTime<Utc>) {
        self.chat_history.push_back(ChatMessage {
            role: Role::User,
            content: query.to_string(),
            timestamp: now,
        });
        self.chat_history.push_back(ChatMessage {
            role: Role::Assistant,
            content: reply.to_string(),
            timestamp: now,
        });
        while self.chat_history.len() > MAX_MESSAGES {
            self.chat_history.pop_front();
        }
        self.query_count += 1;
    }

    /// Remember what the map is currently showing.
    pub fn record_map_state(&mut self, bbox: Option<BBox>, collections: &[String]) {
        if let Some(bbox) = bbox {
            self.last_bbox = Some(bbox);
            self.has_rendered_map = true;
        }
        if !collections.is_empty() {
            self.last_collections = collections.to_vec();
            for id in collections {
                if !self.context_topics.contains(id) {
                    self.context_topics.push(id.clone());
                }
            }
        }
    }

    /// The trailing conversation as prompt context, newest last.
    pub fn recent_history(&self, max_exchanges: usize) -> String {
        let take = (max_exchanges * 2).min(self.chat_history.len());
        let skip = self.chat_history.len() - take;
        self.chat_history
            .iter()
            .skip(skip)
            .map(|m| {
                let who = match m.role {
                    Role::User => "User",
                    Role::Assistant => "Assistant",
                };
                format!("{who}: {}", m.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// In-memory session map. The outer lock is held only for lookup; each
/// session carries its own async mutex so turns for one session run
/// serially while sessions proceed in parallel.
pub struct ConversationStore {
    sessions: RwLock<HashMap<String, Arc<tokio::sync::Mutex<ConversationContext>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        ConversationStore {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the session handle, creating it on first sight.
    pub fn session(&self, id: &str) -> Arc<tokio::sync::Mutex<ConversationContext>> {
        if let Some(existing) = self.sessions.read().unwrap().get(id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().unwrap();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| {
                tracing::debug!("conversation store: new session {id}");
                Arc::new(tokio::sync::Mutex::new(ConversationContext::new(id.to_string())))
            })
            .clone()
    }

    /// Drop a session entirely. The next query starts from scratch.
    pub fn reset(&self, id: &str) -> bool {
        let removed = self.sessions.write().unwrap().remove(id).is_some();
        if removed {
            tracing::info!("conversation store: session {id} reset");
        }
        removed
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().unwrap().len()
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}
