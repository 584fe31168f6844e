use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Maps live session identifiers to their token delivery channels. Entries
/// are created when a client connects and removed on disconnect; a push to
/// an unknown or closed session is silently dropped; the generation call
/// itself never depends on a listener being present.
#[derive(Default)]
pub struct SessionRegistry {
    channels: Mutex<HashMap<String, UnboundedSender<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the delivery channel for a session, replacing any previous one.
    pub fn register(&self, session_id: &str) -> UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut channels) = self.channels.lock() {
            channels.insert(session_id.to_string(), tx);
        }
        rx
    }

    pub fn unregister(&self, session_id: &str) {
        if let Ok(mut channels) = self.channels.lock() {
            channels.remove(session_id);
        }
    }

    pub fn push(&self, session_id: &str, token: &str) {
        if let Ok(channels) = self.channels.lock() {
            if let Some(tx) = channels.get(session_id) {
                let _ = tx.send(token.to_string());
            }
        }
    }
}

/// Handle given to a generation backend for live token delivery, keyed by
/// an opaque session identifier. The sink neither buffers nor replays.
#[derive(Clone)]
pub struct TokenSink {
    session_id: String,
    registry: Arc<SessionRegistry>,
}

impl TokenSink {
    pub fn new(session_id: impl Into<String>, registry: Arc<SessionRegistry>) -> Self {
        Self {
            session_id: session_id.into(),
            registry,
        }
    }

    pub fn push(&self, token: &str) {
        self.registry.push(&self.session_id, token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_sessions_receive_pushed_tokens() {
        let registry = Arc::new(SessionRegistry::new());
        let mut rx = registry.register("abc");

        let sink = TokenSink::new("abc", registry.clone());
        sink.push("Bonjour");
        sink.push(" !");

        assert_eq!(rx.recv().await.as_deref(), Some("Bonjour"));
        assert_eq!(rx.recv().await.as_deref(), Some(" !"));
    }

    #[tokio::test]
    async fn pushes_to_unknown_sessions_are_dropped() {
        let registry = Arc::new(SessionRegistry::new());
        // no panic, nothing to observe: the token just disappears
        registry.push("nobody", "token");

        let mut rx = registry.register("abc");
        registry.unregister("abc");
        registry.push("abc", "late");
        assert!(rx.recv().await.is_none());
    }
}
