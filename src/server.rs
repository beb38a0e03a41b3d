//! Signaling server implementation.
//!
//! Accepts framed connections, dispatches decoded operations to the
//! protocol handlers, and fans resulting notifications out to the affected
//! clients. A client joins with KNOCK (allocating its id), publishes
//! endpoints with BIND/ACCEPTING, establishes sessions with CONNECT, and is
//! torn down by the goodbye procedure when its transport closes.

use crate::address::ClientId;
use crate::allocator::AddressAllocator;
use crate::config::ServerConfig;
use crate::error::SignalError;
use crate::framing::{read_frame, write_frame};
use crate::protocol::{
    Accept, Accepting, Acknowledgement, AliasUpdate, Bind, Connect, Goodbye, Greeting, Knock,
    Message, Shutdown,
};
use crate::registry::{ClientHandle, Outbound, Registry};
use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};

/// Acknowledgement id sent when a KNOCK is rejected for subnet overflow.
const REJECTED_ID: &str = "-1";

/// Shared server state threaded through every connection task.
#[derive(Clone)]
struct Shared {
    allocator: Arc<AddressAllocator>,
    registry: Arc<RwLock<Registry>>,
    channel_capacity: usize,
}

/// Signaling and rendezvous server.
pub struct SignalingServer {
    config: ServerConfig,
    shared: Shared,
}

impl SignalingServer {
    pub fn new(config: ServerConfig) -> Self {
        let channel_capacity = config.client_channel_capacity;
        Self {
            config,
            shared: Shared {
                allocator: Arc::new(AddressAllocator::new()),
                registry: Arc::new(RwLock::new(Registry::new())),
                channel_capacity,
            },
        }
    }

    /// Run the server until the listener fails. The liveness keeper runs
    /// alongside the accept loop and is cancelled when it exits.
    pub async fn run(&self) -> Result<()> {
        self.config.validate().map_err(|e| anyhow!(e))?;

        let listener = TcpListener::bind(self.config.bind_addr()).await?;
        info!("Signaling server listening on {}", self.config.bind_addr());

        let keeper = tokio::spawn(liveness_keeper(
            self.shared.clone(),
            self.config.liveness_interval(),
        ));
        let result = self.accept_loop(listener).await;
        keeper.abort();
        result
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    info!("Client connected from {}", peer_addr);
                    let shared = self.shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, shared).await {
                            debug!("Client {} disconnected: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Run the signaling server (convenience function).
pub async fn run_signaling_server(config: ServerConfig) -> Result<()> {
    let server = SignalingServer::new(config);
    server.run().await
}

/// Handle a single client connection.
///
/// The loop multiplexes inbound frames with the client's outbound channel;
/// on any exit the goodbye procedure runs if the client completed KNOCK.
async fn handle_connection<S>(stream: S, shared: Shared) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    let (tx, mut rx) = mpsc::channel::<Outbound>(shared.channel_capacity);
    let mut session = Session {
        id: None,
        handle: ClientHandle::new(tx),
        shared,
    };
    let mut loop_error: Option<anyhow::Error> = None;

    loop {
        tokio::select! {
            frame = read_frame(&mut reader) => {
                let envelope = match frame {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        loop_error = Some(anyhow!("Read error: {}", e));
                        break;
                    }
                };
                match Message::decode(envelope) {
                    Ok(message) => session.dispatch(message).await,
                    Err(e) => {
                        // Unknown opcode or unusable payload: fatal for
                        // this connection, never for the server.
                        loop_error = Some(e.into());
                        break;
                    }
                }
            }

            outbound = rx.recv() => {
                match outbound {
                    Some(Outbound::Deliver(message)) => {
                        if let Err(e) = write_frame(&mut writer, &message.encode()).await {
                            loop_error = Some(anyhow!("Write error: {}", e));
                            break;
                        }
                    }
                    Some(Outbound::Terminate) | None => break,
                }
            }
        }
    }

    if let Some(id) = session.id {
        goodbye(&session.shared, id).await;
    }

    match loop_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Per-connection context: the transport handle plus the registered id once
/// KNOCK has completed.
struct Session {
    id: Option<ClientId>,
    handle: ClientHandle,
    shared: Shared,
}

impl Session {
    async fn dispatch(&mut self, message: Message) {
        match message {
            Message::Knock(knock) => self.handle_knock(knock).await,
            Message::Offer(offer) => {
                let target = offer.answerer_id;
                self.relay(target, Message::Offer(offer)).await;
            }
            Message::Answer(answer) => {
                let target = answer.offerer_id;
                self.relay(target, Message::Answer(answer)).await;
            }
            Message::Candidate(candidate) => {
                let target = candidate.answerer_id;
                self.relay(target, Message::Candidate(candidate)).await;
            }
            Message::Bind(bind) => self.handle_bind(bind).await,
            Message::Accepting(accepting) => self.handle_accepting(accepting).await,
            Message::Shutdown(shutdown) => self.handle_shutdown(shutdown).await,
            Message::Connect(connect) => self.handle_connect(connect).await,
            Message::Ping => self.handle.send(Message::Pong),
            Message::Pong => self.handle.mark_alive(),
            other => {
                warn!(
                    "Ignoring server-bound frame with outbound opcode {:?}",
                    other.opcode()
                );
            }
        }
    }

    /// KNOCK: allocate an id, acknowledge, greet the existing peers, then
    /// register. The acknowledgement is queued before any greeting, and the
    /// new client is inserted only after the greetings went out, so it
    /// receives none of them.
    async fn handle_knock(&mut self, knock: Knock) {
        if let Some(id) = self.id {
            warn!("Ignoring duplicate KNOCK from {}", id);
            return;
        }

        let id = match self.shared.allocator.create_ip(knock.subnet).await {
            Ok(id) => id,
            Err(SignalError::SubnetOverflow(subnet)) => {
                warn!("Subnet {} exhausted, rejecting knock", subnet);
                self.handle.send(Message::Acknowledgement(Acknowledgement {
                    id: REJECTED_ID.to_string(),
                    rejected: true,
                }));
                return;
            }
            Err(e) => {
                error!("Knock allocation failed: {}", e);
                return;
            }
        };

        self.handle.send(Message::Acknowledgement(Acknowledgement {
            id: id.to_string(),
            rejected: false,
        }));

        let mut registry = self.shared.registry.write().await;
        for (existing, handle) in registry.clients() {
            handle.send(Message::Greeting(Greeting {
                offerer_id: *existing,
                answerer_id: id,
            }));
        }
        registry.add_client(id, self.handle.clone());
        drop(registry);

        self.id = Some(id);
        info!("Client {} joined", id);
    }

    /// OFFER/ANSWER/CANDIDATE: pure relay. An absent target means the peer
    /// already left; the sender will learn via its Goodbye.
    async fn relay(&self, target: ClientId, message: Message) {
        let registry = self.shared.registry.read().await;
        match registry.get_client(target) {
            Some(handle) => handle.send(message),
            None => debug!(
                "Dropping {:?} for absent client {}",
                message.opcode(),
                target
            ),
        }
    }

    /// BIND: publish a client-chosen alias. A duplicate alias or a port
    /// collision is answered with a directed rejection; success is
    /// broadcast to every client, the binder included.
    async fn handle_bind(&self, bind: Bind) {
        let mut registry = self.shared.registry.write().await;

        if registry.lookup_alias(bind.alias).is_some() {
            send_to(&registry, bind.id, Message::Alias(AliasUpdate::plain(
                bind.id, bind.alias, false,
            )));
            return;
        }

        if let Err(e) = self.shared.allocator.claim_port(bind.alias).await {
            warn!("Bind of {} rejected: {}", bind.alias, e);
            send_to(&registry, bind.id, Message::Alias(AliasUpdate::plain(
                bind.id, bind.alias, false,
            )));
            return;
        }

        registry.bind_alias(bind.alias, bind.id);
        info!("Client {} bound {}", bind.id, bind.alias);
        broadcast(
            &registry,
            &Message::Alias(AliasUpdate::plain(bind.id, bind.alias, true)),
            None,
        );
    }

    /// ACCEPTING: flip the alias to accepting. Silent in both outcomes; the
    /// bind already declared the alias set.
    async fn handle_accepting(&self, accepting: Accepting) {
        let mut registry = self.shared.registry.write().await;
        if registry.set_accepting(accepting.alias, accepting.id) {
            info!("Client {} accepting on {}", accepting.id, accepting.alias);
        } else {
            debug!(
                "Rejected ACCEPTING of {} by {}: no such alias or wrong owner",
                accepting.alias, accepting.id
            );
        }
    }

    /// SHUTDOWN: withdraw an owned alias and broadcast the teardown. A
    /// non-owned or unknown alias is answered with a directed restoration.
    async fn handle_shutdown(&self, shutdown: Shutdown) {
        let mut registry = self.shared.registry.write().await;

        if registry.unbind_alias(shutdown.alias, shutdown.id) {
            self.shared.allocator.release_port(shutdown.alias).await;
            info!("Client {} shut down {}", shutdown.id, shutdown.alias);
            broadcast(
                &registry,
                &Message::Alias(AliasUpdate::plain(shutdown.id, shutdown.alias, false)),
                None,
            );
        } else {
            send_to(&registry, shutdown.id, Message::Alias(AliasUpdate::plain(
                shutdown.id, shutdown.alias, true,
            )));
        }
    }

    /// CONNECT: mint a connection alias for the initiator and, if the
    /// remote alias is accepting, perform the five-message handshake in
    /// order. Otherwise the minted port is rolled back and only the
    /// initiator hears about it.
    async fn handle_connect(&self, connect: Connect) {
        let client_alias = match self.shared.allocator.create_port(connect.id).await {
            Ok(alias) => alias,
            Err(e) => {
                // The initiator's suffix vanished mid-flight; nothing to
                // roll back and nobody to answer.
                warn!("Connect from {} lost its address: {}", connect.id, e);
                return;
            }
        };

        let mut registry = self.shared.registry.write().await;
        let remote_owner = registry
            .lookup_alias(connect.remote_alias)
            .filter(|entry| entry.accepting)
            .map(|entry| entry.owner);

        let Some(remote_owner) = remote_owner else {
            self.shared.allocator.release_port(client_alias).await;
            debug!(
                "Rejected CONNECT from {} to {}: absent or not accepting",
                connect.id, connect.remote_alias
            );
            send_to(&registry, connect.id, Message::Alias(AliasUpdate {
                id: connect.id,
                alias: client_alias,
                set: false,
                client_connection_id: Some(connect.client_connection_id),
                is_connection_alias: None,
            }));
            return;
        };

        registry.connection_alias(client_alias, connect.id);
        info!(
            "Client {} connecting to {} via {}",
            connect.id, connect.remote_alias, client_alias
        );

        let initiator = registry.get_client(connect.id).cloned();
        let remote = registry.get_client(remote_owner).cloned();

        // The five notifications below must keep exactly this order: the
        // initiator learns its local endpoint, the remote owner learns the
        // new alias and accepts it, the initiator learns the remote
        // endpoint for this clientConnectionId.
        if let Some(handle) = &initiator {
            handle.send(Message::Alias(AliasUpdate {
                id: connect.id,
                alias: client_alias,
                set: true,
                client_connection_id: Some(connect.client_connection_id.clone()),
                is_connection_alias: Some(true),
            }));
        }
        if let Some(handle) = &remote {
            handle.send(Message::Alias(AliasUpdate::plain(
                connect.id,
                client_alias,
                true,
            )));
            handle.send(Message::Accept(Accept {
                bound_alias: connect.remote_alias,
                client_alias,
            }));
        }
        if let Some(handle) = &initiator {
            handle.send(Message::Alias(AliasUpdate {
                id: remote_owner,
                alias: connect.remote_alias,
                set: true,
                client_connection_id: Some(connect.client_connection_id),
                is_connection_alias: None,
            }));
        }
    }
}

/// Goodbye procedure for a disconnected client: tear the client's address
/// and aliases down first, then notify the remaining peers. Every
/// `Alias{set:false}` precedes the final `Goodbye`.
async fn goodbye(shared: &Shared, id: ClientId) {
    let mut registry = shared.registry.write().await;

    if let Err(e) = registry.remove_client(id) {
        error!("Goodbye for unregistered client: {}", e);
        return;
    }
    shared.allocator.release_ip(id).await;

    let owned = registry.aliases_for(id);
    for alias in &owned {
        registry.unbind_alias(*alias, id);
        shared.allocator.release_port(*alias).await;
    }

    for alias in owned {
        broadcast(
            &registry,
            &Message::Alias(AliasUpdate::plain(id, alias, false)),
            None,
        );
    }
    broadcast(&registry, &Message::Goodbye(Goodbye { id }), None);
    info!("Client {} left", id);
}

/// Send `message` to every registered client except `except`. Best-effort:
/// a failed send to one peer never aborts the broadcast.
fn broadcast(registry: &Registry, message: &Message, except: Option<ClientId>) {
    for (id, handle) in registry.clients() {
        if Some(*id) == except {
            continue;
        }
        handle.send(message.clone());
    }
}

/// Directed send to one client, dropped silently if the id is not
/// registered.
fn send_to(registry: &Registry, id: ClientId, message: Message) {
    if let Some(handle) = registry.get_client(id) {
        handle.send(message);
    }
}

/// Periodic liveness sweep. Each tick pings every client whose alive flag
/// is still set and clears the flag; a client found with the flag already
/// cleared missed a whole window and is terminated, which runs its goodbye.
async fn liveness_keeper(shared: Shared, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let snapshot = shared.registry.read().await.snapshot();
        for (id, handle) in snapshot {
            if handle.take_alive() {
                handle.send(Message::Ping);
            } else {
                warn!("Client {} missed its liveness window, terminating", id);
                handle.terminate();
            }
        }
    }
}
