//! Connected-client registry and retained-message store.
//!
//! One table is shared by every connection of an MQTT listener (and may be
//! shared between its plain and TLS listeners). All state sits behind a
//! single mutex that is only held for map operations, never across I/O.

use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug)]
struct Registration {
    id: u64,
    peer: SocketAddr,
    clean_session: bool,
    evict: Arc<Notify>,
}

#[derive(Debug, Default)]
struct Inner {
    clients: HashMap<String, Registration>,
    retained: HashMap<String, Bytes>,
    next_id: u64,
}

/// Shared MQTT session state.
#[derive(Debug, Default)]
pub struct SessionTable {
    inner: Mutex<Inner>,
}

/// Proof of registration held by the owning connection.
#[derive(Debug)]
pub struct SessionHandle {
    client_id: String,
    id: u64,
    evicted: Arc<Notify>,
}

impl SessionHandle {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Resolves once another connection has taken over this client id.
    pub async fn evicted(&self) {
        self.evicted.notified().await;
    }
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a client, replacing and evicting any previous holder of the
    /// same client id. An empty id is replaced with a generated one.
    pub fn register(&self, client_id: &str, peer: SocketAddr, clean_session: bool) -> SessionHandle {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;

        let client_id = if client_id.is_empty() {
            format!("auto-{}", id)
        } else {
            client_id.to_string()
        };

        let evict = Arc::new(Notify::new());
        let registration = Registration {
            id,
            peer,
            clean_session,
            evict: Arc::clone(&evict),
        };
        if let Some(previous) = inner.clients.insert(client_id.clone(), registration) {
            previous.evict.notify_one();
        }

        SessionHandle {
            client_id,
            id,
            evicted: evict,
        }
    }

    /// Drop a registration if `handle` still owns it. Returns whether an
    /// entry was removed.
    pub fn unregister(&self, handle: &SessionHandle) -> bool {
        let mut inner = self.lock();
        match inner.clients.get(&handle.client_id) {
            Some(registration) if registration.id == handle.id => {
                inner.clients.remove(&handle.client_id);
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.lock().clients.contains_key(client_id)
    }

    /// Peer address and clean-session flag of a registered client.
    pub fn lookup(&self, client_id: &str) -> Option<(SocketAddr, bool)> {
        self.lock()
            .clients
            .get(client_id)
            .map(|r| (r.peer, r.clean_session))
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.lock().clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store the last payload published to `topic`.
    pub fn retain(&self, topic: &str, payload: Bytes) {
        self.lock().retained.insert(topic.to_string(), payload);
    }

    pub fn retained(&self, topic: &str) -> Option<Bytes> {
        self.lock().retained.get(topic).cloned()
    }

    pub fn retained_count(&self) -> usize {
        self.lock().retained.len()
    }
}
