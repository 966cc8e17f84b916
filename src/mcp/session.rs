//! SSE session bridge
//!
//! Each `GET /sse` connection opens a session with its own outbound channel.
//! Messages posted to `/messages?sessionId=...` are answered on the stream of
//! the session they name. A session is removed once its stream is dropped.

use std::{convert::Infallible, sync::Arc};

use axum::response::sse::Event;
use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::AppError;

pub const SESSION_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, mpsc::Sender<Value>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) -> Session {
        let id = Uuid::new_v4().to_string();
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_CAPACITY);
        self.sessions.insert(id.clone(), sender);
        info!(session_id = %id, active_sessions = self.sessions.len(), "session opened");

        Session {
            guard: SessionGuard {
                registry: self.clone(),
                id: id.clone(),
            },
            id,
            receiver,
        }
    }

    pub fn close(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            info!(session_id = %id, active_sessions = self.sessions.len(), "session closed");
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Queues `message` on the stream of session `id`.
    pub async fn deliver(&self, id: &str, message: Value) -> Result<(), AppError> {
        // Clone the sender so the map shard is not locked across the await.
        let sender = self
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(session_not_found)?;

        if sender.send(message).await.is_err() {
            self.close(id);
            return Err(session_not_found());
        }

        debug!(session_id = %id, "message queued for session");
        Ok(())
    }
}

fn session_not_found() -> AppError {
    AppError::not_found("session_not_found", "no active session with this id")
}

/// Removes the session from the registry when dropped.
struct SessionGuard {
    registry: SessionRegistry,
    id: String,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.close(&self.id);
    }
}

pub struct Session {
    pub id: String,
    receiver: mpsc::Receiver<Value>,
    guard: SessionGuard,
}

impl Session {
    pub fn endpoint(&self, messages_path: &str) -> String {
        format!("{messages_path}?sessionId={}", self.id)
    }

    /// Turns the session into its SSE stream: an `endpoint` event naming the
    /// message URL, then one `message` event per queued JSON-RPC message.
    pub fn into_event_stream(
        self,
        messages_path: &str,
    ) -> impl Stream<Item = Result<Event, Infallible>> + Send + 'static {
        let endpoint = self.endpoint(messages_path);
        let Session {
            mut receiver,
            guard,
            ..
        } = self;

        async_stream::stream! {
            let _guard = guard;
            yield Ok(Event::default().event("endpoint").data(endpoint));

            while let Some(message) = receiver.recv().await {
                yield Ok(Event::default().event("message").data(message.to_string()));
            }
        }
    }
}
