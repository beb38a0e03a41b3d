//! Session registry: live clients and published aliases.
//!
//! The two tables cross-reference each other by id value rather than by
//! handle, so either side can be torn down without dangling references.
//! The registry itself holds no locks; the server serialises all access
//! behind a single `RwLock`.

use crate::address::{Alias, ClientId};
use crate::error::{SignalError, SignalResult};
use crate::protocol::Message;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Instruction for a connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    /// Encode and write one message.
    Deliver(Message),
    /// Drop the connection (liveness timeout).
    Terminate,
}

/// Server-side handle to one connected client: the outbound channel plus
/// the liveness flag shared with the keeper.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    tx: mpsc::Sender<Outbound>,
    alive: Arc<AtomicBool>,
}

impl ClientHandle {
    pub fn new(tx: mpsc::Sender<Outbound>) -> Self {
        Self {
            tx,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Queue a message for delivery. Best-effort: a full or closed channel
    /// drops the message rather than stalling the caller.
    pub fn send(&self, message: Message) {
        if let Err(err) = self.tx.try_send(Outbound::Deliver(message)) {
            debug!("dropping outbound message: {}", err);
        }
    }

    /// Ask the writer task to close the transport.
    pub fn terminate(&self) {
        let _ = self.tx.try_send(Outbound::Terminate);
    }

    /// Record a pong from this client.
    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clear the alive flag, returning whether the client had answered
    /// since the previous sweep.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }
}

/// Record for one published alias.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasEntry {
    pub owner: ClientId,
    /// `false` at BIND time; flips once a matching ACCEPTING arrives.
    pub accepting: bool,
}

/// Client and alias tables.
#[derive(Debug, Default)]
pub struct Registry {
    clients: HashMap<ClientId, ClientHandle>,
    aliases: HashMap<Alias, AliasEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_client(&mut self, id: ClientId, handle: ClientHandle) {
        self.clients.insert(id, handle);
    }

    pub fn remove_client(&mut self, id: ClientId) -> SignalResult<ClientHandle> {
        self.clients
            .remove(&id)
            .ok_or(SignalError::ClientDoesNotExist(id))
    }

    pub fn get_client(&self, id: ClientId) -> Option<&ClientHandle> {
        self.clients.get(&id)
    }

    pub fn contains_client(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Iterate the live client set.
    pub fn clients(&self) -> impl Iterator<Item = (&ClientId, &ClientHandle)> {
        self.clients.iter()
    }

    /// Owned snapshot of the live client set, for use outside the lock.
    pub fn snapshot(&self) -> Vec<(ClientId, ClientHandle)> {
        self.clients
            .iter()
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Publish a bound alias. Succeeds iff the alias is absent; the new
    /// entry starts non-accepting.
    pub fn bind_alias(&mut self, alias: Alias, owner: ClientId) -> bool {
        if self.aliases.contains_key(&alias) {
            return false;
        }
        self.aliases.insert(
            alias,
            AliasEntry {
                owner,
                accepting: false,
            },
        );
        true
    }

    /// Mark a bound alias as accepting. Succeeds iff the alias exists and
    /// `owner` matches its record.
    pub fn set_accepting(&mut self, alias: Alias, owner: ClientId) -> bool {
        match self.aliases.get_mut(&alias) {
            Some(entry) if entry.owner == owner => {
                entry.accepting = true;
                true
            }
            _ => false,
        }
    }

    /// Withdraw an alias. Succeeds iff it exists and `owner` matches.
    pub fn unbind_alias(&mut self, alias: Alias, owner: ClientId) -> bool {
        match self.aliases.get(&alias) {
            Some(entry) if entry.owner == owner => {
                self.aliases.remove(&alias);
                true
            }
            _ => false,
        }
    }

    /// Register a server-minted connection alias. Unconditional insertion;
    /// connection aliases never accept inbound CONNECTs.
    pub fn connection_alias(&mut self, alias: Alias, owner: ClientId) {
        self.aliases.insert(
            alias,
            AliasEntry {
                owner,
                accepting: false,
            },
        );
    }

    pub fn lookup_alias(&self, alias: Alias) -> Option<&AliasEntry> {
        self.aliases.get(&alias)
    }

    /// Every alias owned by `owner`, for disconnect teardown.
    pub fn aliases_for(&self, owner: ClientId) -> Vec<Alias> {
        self.aliases
            .iter()
            .filter(|(_, entry)| entry.owner == owner)
            .map(|(alias, _)| *alias)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> ClientHandle {
        let (tx, _rx) = mpsc::channel(8);
        ClientHandle::new(tx)
    }

    fn id(s: &str) -> ClientId {
        s.parse().unwrap()
    }

    fn alias(s: &str) -> Alias {
        s.parse().unwrap()
    }

    #[test]
    fn test_client_table() {
        let mut registry = Registry::new();
        let a = id("127.0.0.0");

        registry.add_client(a, handle());
        assert!(registry.contains_client(a));
        assert_eq!(registry.client_count(), 1);

        registry.remove_client(a).unwrap();
        assert!(!registry.contains_client(a));
        assert!(matches!(
            registry.remove_client(a),
            Err(SignalError::ClientDoesNotExist(_))
        ));
    }

    #[test]
    fn test_bind_rejects_duplicates() {
        let mut registry = Registry::new();
        let owner = id("127.0.0.0");
        let published = alias("127.0.0.0:0");

        assert!(registry.bind_alias(published, owner));
        assert!(!registry.bind_alias(published, id("127.0.0.1")));

        let entry = registry.lookup_alias(published).unwrap();
        assert_eq!(entry.owner, owner);
        assert!(!entry.accepting);
    }

    #[test]
    fn test_set_accepting_requires_matching_owner() {
        let mut registry = Registry::new();
        let owner = id("127.0.0.0");
        let published = alias("127.0.0.0:0");
        registry.bind_alias(published, owner);

        assert!(!registry.set_accepting(published, id("127.0.0.1")));
        assert!(!registry.lookup_alias(published).unwrap().accepting);

        assert!(registry.set_accepting(published, owner));
        assert!(registry.lookup_alias(published).unwrap().accepting);

        assert!(!registry.set_accepting(alias("127.0.0.0:9"), owner));
    }

    #[test]
    fn test_unbind_requires_matching_owner() {
        let mut registry = Registry::new();
        let owner = id("127.0.0.0");
        let published = alias("127.0.0.0:0");
        registry.bind_alias(published, owner);

        assert!(!registry.unbind_alias(published, id("127.0.0.1")));
        assert!(registry.lookup_alias(published).is_some());

        assert!(registry.unbind_alias(published, owner));
        assert!(registry.lookup_alias(published).is_none());
    }

    #[test]
    fn test_connection_alias_inserts_unconditionally() {
        let mut registry = Registry::new();
        let owner = id("127.0.0.1");
        let conn = alias("127.0.0.1:0");

        registry.connection_alias(conn, owner);
        let entry = registry.lookup_alias(conn).unwrap();
        assert_eq!(entry.owner, owner);
        assert!(!entry.accepting);
    }

    #[test]
    fn test_aliases_for_collects_all_owned() {
        let mut registry = Registry::new();
        let owner = id("127.0.0.0");
        let other = id("127.0.0.1");

        registry.bind_alias(alias("127.0.0.0:0"), owner);
        registry.connection_alias(alias("127.0.0.0:1"), owner);
        registry.bind_alias(alias("127.0.0.1:0"), other);

        let mut owned = registry.aliases_for(owner);
        owned.sort();
        assert_eq!(owned, vec![alias("127.0.0.0:0"), alias("127.0.0.0:1")]);
    }

    #[tokio::test]
    async fn test_handle_send_is_best_effort() {
        let (tx, mut rx) = mpsc::channel(1);
        let handle = ClientHandle::new(tx);

        handle.send(Message::Ping);
        // Channel is full now; the second send drops instead of blocking.
        handle.send(Message::Pong);

        assert!(matches!(
            rx.recv().await,
            Some(Outbound::Deliver(Message::Ping))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_alive_flag_swaps() {
        let handle = handle();
        assert!(handle.take_alive());
        assert!(!handle.take_alive());
        handle.mark_alive();
        assert!(handle.take_alive());
    }
}
