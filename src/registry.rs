use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::ChatError;
use crate::types::ConnectionId;

/// An encoded wire line, shared between every recipient of one broadcast.
pub type Outgoing = Arc<str>;

/// The registry's reference to a live connection.
///
/// The socket itself stays owned by its connection handler. The handle is
/// the sending side of that handler's bounded outbound queue; a writer task
/// drains the queue onto the socket and drops the receiver when a write
/// fails. Both a dropped receiver and a full queue (a peer that stopped
/// reading) surface here as a failed `send`.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Outgoing>,
}

impl ClientHandle {
    pub fn channel(id: ConnectionId, capacity: usize) -> (Self, mpsc::Receiver<Outgoing>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { id, tx }, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a line without waiting. Never blocks, so it is safe to call
    /// with locks held.
    pub fn send(&self, line: Outgoing) -> Result<(), ChatError> {
        self.tx
            .try_send(line)
            .map_err(|_| ChatError::WriteFailure(self.id.to_string()))
    }
}

/// Name → connection mapping shared by every handler.
///
/// One lock guards the whole map. No method awaits or performs I/O while
/// holding it: callers that need to write take a [`snapshot`](Self::snapshot)
/// and release the lock first.
#[derive(Debug, Default)]
pub struct Registry {
    clients: Mutex<HashMap<String, ClientHandle>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name` for `handle`. Never replaces an existing entry.
    pub fn register(&self, name: &str, handle: ClientHandle) -> Result<(), ChatError> {
        let mut clients = self.clients.lock();
        if clients.contains_key(name) {
            return Err(ChatError::NameTaken(name.to_string()));
        }
        clients.insert(name.to_string(), handle);
        Ok(())
    }

    /// Drop `name` whichever connection holds it. Absent names are a no-op.
    ///
    /// This does not announce anything; go through
    /// [`Broadcaster::remove`](crate::broadcast::Broadcaster::remove) to have
    /// the new roster sent.
    pub fn remove(&self, name: &str) -> Option<ClientHandle> {
        self.clients.lock().remove(name)
    }

    /// Drop `name` only while it still belongs to connection `id`.
    ///
    /// Handlers and the broadcaster remove through this, so a late removal
    /// for a dead connection leaves a newer holder of the same name alone.
    pub fn remove_connection(&self, name: &str, id: ConnectionId) -> bool {
        let mut clients = self.clients.lock();
        match clients.get(name) {
            Some(handle) if handle.id() == id => {
                clients.remove(name);
                true
            }
            _ => false,
        }
    }

    /// Copy of every entry, ordered by name.
    pub fn snapshot(&self) -> Vec<(String, ClientHandle)> {
        let mut entries: Vec<_> = self
            .clients
            .lock()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// The roster, ordered by name.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.clients.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.clients.lock().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}
