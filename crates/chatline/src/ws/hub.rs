//! Presence directory.
//!
//! One actor task owns the identity -> connection map. Everything else talks
//! to it through a [`WsHub`] handle, so register, unregister and broadcast for
//! any identity are applied in the order they were queued.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};

use super::connection::{Connection, ConnectionId};
use super::types::WsEvent;
use crate::identity::Identity;

/// Default size of the hub command queue.
const HUB_BUFFER_SIZE: usize = 1024;

enum HubCommand {
    Register(Connection),
    Unregister(Identity),
    ConnectionClosed {
        identity: Identity,
        id: ConnectionId,
    },
    Lookup {
        identity: Identity,
        reply: oneshot::Sender<Option<Connection>>,
    },
    Broadcast(WsEvent),
    Online(oneshot::Sender<Vec<Identity>>),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the presence directory.
///
/// Cheap to clone; every clone talks to the same actor. Once the hub has been
/// shut down, mutations are logged and dropped and queries report nobody
/// online.
#[derive(Clone, Debug)]
pub struct WsHub {
    tx: mpsc::Sender<HubCommand>,
}

impl WsHub {
    /// Spawn the hub actor on the current runtime.
    pub fn start() -> Self {
        Self::with_buffer(HUB_BUFFER_SIZE)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        tokio::spawn(HubActor::new(rx).run());
        Self { tx }
    }

    async fn dispatch(&self, command: HubCommand) -> bool {
        if self.tx.send(command).await.is_err() {
            warn!("WebSocket hub is not running, dropping command");
            return false;
        }
        true
    }

    /// Make `conn` the live connection for its identity.
    ///
    /// A previous connection for the same identity is closed first. Every
    /// registered connection then receives the updated presence list.
    pub async fn register(&self, conn: Connection) {
        self.dispatch(HubCommand::Register(conn)).await;
    }

    /// Remove and close the connection for `identity`, if any.
    pub async fn unregister(&self, identity: &Identity) {
        self.dispatch(HubCommand::Unregister(identity.clone())).await;
    }

    /// Unregister `identity` only if `id` is still its live connection.
    ///
    /// Used by socket tasks so that a replaced connection going away does not
    /// evict its successor.
    pub async fn connection_closed(&self, identity: &Identity, id: ConnectionId) {
        self.dispatch(HubCommand::ConnectionClosed {
            identity: identity.clone(),
            id,
        })
        .await;
    }

    /// Current live connection for `identity`.
    pub async fn lookup(&self, identity: &Identity) -> Option<Connection> {
        let (reply, rx) = oneshot::channel();
        let command = HubCommand::Lookup {
            identity: identity.clone(),
            reply,
        };
        if !self.dispatch(command).await {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Push `event` to every registered connection.
    ///
    /// A connection that is gone, or whose message queue is full, is
    /// unregistered. Presence lists replace each other and never fill a queue.
    pub async fn broadcast(&self, event: WsEvent) {
        self.dispatch(HubCommand::Broadcast(event)).await;
    }

    /// Identities currently online, sorted.
    pub async fn online(&self) -> Vec<Identity> {
        let (reply, rx) = oneshot::channel();
        if !self.dispatch(HubCommand::Online(reply)).await {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Close every live connection and stop the actor.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.dispatch(HubCommand::Shutdown(reply)).await {
            let _ = rx.await;
        }
    }
}

struct HubActor {
    connections: HashMap<Identity, Connection>,
    rx: mpsc::Receiver<HubCommand>,
}

impl HubActor {
    fn new(rx: mpsc::Receiver<HubCommand>) -> Self {
        Self {
            connections: HashMap::new(),
            rx,
        }
    }

    async fn run(mut self) {
        debug!("WebSocket hub started");

        while let Some(command) = self.rx.recv().await {
            match command {
                HubCommand::Register(conn) => self.register(conn),
                HubCommand::Unregister(identity) => self.unregister(&identity),
                HubCommand::ConnectionClosed { identity, id } => {
                    self.connection_closed(&identity, id)
                }
                HubCommand::Lookup { identity, reply } => {
                    let _ = reply.send(self.connections.get(&identity).cloned());
                }
                HubCommand::Broadcast(event) => self.broadcast(&event),
                HubCommand::Online(reply) => {
                    let _ = reply.send(self.online());
                }
                HubCommand::Shutdown(reply) => {
                    self.close_all();
                    let _ = reply.send(());
                    break;
                }
            }
        }

        // Also reached when every handle has been dropped.
        self.close_all();
        info!("WebSocket hub stopped");
    }

    fn register(&mut self, conn: Connection) {
        let identity = conn.identity().clone();

        if let Some(previous) = self.connections.remove(&identity) {
            info!(
                "Replacing connection {} for user {} with connection {}",
                previous.id(),
                identity,
                conn.id()
            );
            previous.close();
        }

        info!("Registered connection {} for user {}", conn.id(), identity);
        self.connections.insert(identity, conn);
        info!("Users online: {}", self.connections.len());

        self.broadcast_presence();
    }

    fn unregister(&mut self, identity: &Identity) {
        let Some(conn) = self.connections.remove(identity) else {
            debug!("Unregister for offline user {} ignored", identity);
            return;
        };

        conn.close();
        info!(
            "Unregistered connection {} for user {}. Users online: {}",
            conn.id(),
            identity,
            self.connections.len()
        );

        self.broadcast_presence();
    }

    fn connection_closed(&mut self, identity: &Identity, id: ConnectionId) {
        match self.connections.get(identity) {
            Some(current) if current.id() == id => self.unregister(identity),
            Some(current) => debug!(
                "Connection {} for user {} already replaced by {}",
                id,
                identity,
                current.id()
            ),
            None => debug!("Connection {} for user {} already removed", id, identity),
        }
    }

    fn online(&self) -> Vec<Identity> {
        let mut online: Vec<Identity> = self.connections.keys().cloned().collect();
        online.sort();
        online
    }

    fn broadcast_presence(&mut self) {
        let event = WsEvent::PresenceList(self.online());
        self.broadcast(&event);
    }

    fn broadcast(&mut self, event: &WsEvent) {
        let text = match serde_json::to_string(event) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to serialize {} event: {}", event.kind(), e);
                return;
            }
        };

        let broken: Vec<Identity> = self
            .connections
            .iter()
            .filter_map(|(identity, conn)| match conn.send_serialized(event, text.clone()) {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to send {} to user {}: {}", event.kind(), identity, e);
                    Some(identity.clone())
                }
            })
            .collect();

        debug!(
            "Broadcast {} to {} connection(s)",
            event.kind(),
            self.connections.len() - broken.len()
        );

        // Each removal broadcasts the shrunken presence list in turn.
        for identity in broken {
            self.unregister(&identity);
        }
    }

    fn close_all(&mut self) {
        if self.connections.is_empty() {
            return;
        }
        info!("Closing {} live connection(s)", self.connections.len());
        for (_, conn) in self.connections.drain() {
            conn.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Message;
    use crate::ws::WsConfig;
    use crate::ws::connection::{Outbound, run_writer};
    use axum::extract::ws::Message as Frame;
    use chrono::Utc;
    use futures::StreamExt;
    use futures::channel::mpsc as fmpsc;
    use std::time::Duration;

    fn connect(identity: &str) -> (Connection, Outbound) {
        Connection::new(Identity::from(identity), 16)
    }

    async fn next_event(out: &mut Outbound) -> WsEvent {
        let frame = tokio::time::timeout(Duration::from_secs(2), out.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed");
        serde_json::from_str(&frame).unwrap()
    }

    fn presence(ids: &[&str]) -> WsEvent {
        WsEvent::PresenceList(ids.iter().map(|id| Identity::from(*id)).collect())
    }

    fn new_message(n: usize) -> WsEvent {
        let now = Utc::now();
        WsEvent::NewMessage(Message {
            id: format!("m{n}"),
            sender_identity: Identity::from("a"),
            receiver_identity: Identity::from("b"),
            text: Some(format!("message {n}")),
            image_url: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Round-trip through the actor so every earlier command has been applied.
    async fn settle(hub: &WsHub) {
        hub.online().await;
    }

    #[tokio::test]
    async fn test_register_broadcasts_presence_to_everyone() {
        let hub = WsHub::start();
        let (a, mut a_out) = connect("a");
        let (b, mut b_out) = connect("b");

        hub.register(a).await;
        assert_eq!(next_event(&mut a_out).await, presence(&["a"]));

        hub.register(b).await;
        assert_eq!(next_event(&mut a_out).await, presence(&["a", "b"]));
        assert_eq!(next_event(&mut b_out).await, presence(&["a", "b"]));

        settle(&hub).await;
        assert!(a_out.try_next().is_none());
        assert!(b_out.try_next().is_none());
    }

    #[tokio::test]
    async fn test_unregister_broadcasts_to_remaining() {
        let hub = WsHub::start();
        let (a, mut a_out) = connect("a");
        let (b, mut b_out) = connect("b");
        hub.register(a).await;
        hub.register(b).await;
        settle(&hub).await;
        while a_out.try_next().is_some() {}

        hub.unregister(&Identity::from("b")).await;
        assert_eq!(next_event(&mut a_out).await, presence(&["a"]));
        settle(&hub).await;
        assert!(a_out.try_next().is_none());

        // b's own channel is closed, it gets nothing further
        assert!(b_out.is_closed());
        assert_eq!(hub.online().await, vec![Identity::from("a")]);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = WsHub::start();
        let (a, mut a_out) = connect("a");
        hub.register(a).await;
        assert_eq!(next_event(&mut a_out).await, presence(&["a"]));

        hub.unregister(&Identity::from("ghost")).await;
        hub.unregister(&Identity::from("ghost")).await;
        settle(&hub).await;

        // Nothing changed, so nobody was notified
        assert!(a_out.try_next().is_none());
        assert_eq!(hub.online().await, vec![Identity::from("a")]);
    }

    #[tokio::test]
    async fn test_reregister_closes_and_replaces_previous() {
        let hub = WsHub::start();
        let (first, first_out) = connect("a");
        let first_id = first.id();
        let (second, mut second_out) = connect("a");
        let second_id = second.id();

        hub.register(first).await;
        hub.register(second).await;
        settle(&hub).await;

        assert!(first_out.is_closed());
        assert_eq!(next_event(&mut second_out).await, presence(&["a"]));
        assert_eq!(hub.online().await.len(), 1);
        assert_eq!(
            hub.lookup(&Identity::from("a")).await.map(|c| c.id()),
            Some(second_id)
        );

        // The replaced connection's socket task reporting in late is ignored
        hub.connection_closed(&Identity::from("a"), first_id).await;
        assert_eq!(
            hub.lookup(&Identity::from("a")).await.map(|c| c.id()),
            Some(second_id)
        );

        hub.connection_closed(&Identity::from("a"), second_id).await;
        assert!(hub.lookup(&Identity::from("a")).await.is_none());
        assert!(second_out.is_closed());
    }

    #[tokio::test]
    async fn test_directory_never_holds_duplicates() {
        let hub = WsHub::start();
        let mut outs = Vec::new();
        for round in 0..5 {
            for id in ["a", "b", "c"] {
                let (conn, out) = connect(id);
                outs.push(out);
                hub.register(conn).await;
            }
            if round % 2 == 1 {
                hub.unregister(&Identity::from("b")).await;
            }
            let online = hub.online().await;
            let mut deduped = online.clone();
            deduped.dedup();
            assert_eq!(online, deduped);
        }
        // Only the latest connection per identity is still open
        let open = outs.iter().filter(|o| !o.is_closed()).count();
        assert_eq!(open, 3);
    }

    #[tokio::test]
    async fn test_concurrent_registers_converge() {
        const N: usize = 300;
        let config = WsConfig::default();
        let hub = WsHub::start();

        let mut tasks = Vec::new();
        let mut sockets = Vec::new();
        for i in 0..N {
            let identity = Identity::new(format!("user-{i}"));
            let (conn, out) = Connection::new(identity, config.connection_buffer);
            let (sink, written) = fmpsc::unbounded::<Frame>();
            tokio::spawn(run_writer(sink, out, None));
            sockets.push(written);

            let hub = hub.clone();
            tasks.push(tokio::spawn(async move { hub.register(conn).await }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(hub.online().await.len(), N);

        // Every client ends up seeing the full list
        for mut written in sockets {
            let converged = tokio::time::timeout(Duration::from_secs(5), async {
                while let Some(frame) = written.next().await {
                    let Frame::Text(text) = frame else { continue };
                    match serde_json::from_str(text.as_str()).unwrap() {
                        WsEvent::PresenceList(ids) if ids.len() == N => return true,
                        _ => continue,
                    }
                }
                false
            })
            .await;
            assert!(matches!(converged, Ok(true)), "a client never saw all {N} users");
        }
    }

    #[tokio::test]
    async fn test_presence_burst_keeps_stalled_client() {
        let config = WsConfig::default();
        let hub = WsHub::start();
        let (stalled, mut stalled_out) =
            Connection::new(Identity::from("stalled"), config.connection_buffer);
        hub.register(stalled).await;

        // Far more presence updates than the queue holds, none of them read
        let mut others = Vec::new();
        for i in 0..config.connection_buffer * 3 {
            let (conn, out) = Connection::new(Identity::new(format!("user-{i}")), 1);
            others.push(out);
            hub.register(conn).await;
        }
        let online = hub.online().await;
        assert_eq!(online.len(), config.connection_buffer * 3 + 1);
        assert!(online.contains(&Identity::from("stalled")));
        assert!(others.iter().all(|out| !out.is_closed()));

        // Once it drains, it gets the latest list and nothing stale
        assert_eq!(next_event(&mut stalled_out).await, WsEvent::PresenceList(online));
        assert!(stalled_out.try_next().is_none());
    }

    #[tokio::test]
    async fn test_full_message_queue_drops_only_that_connection() {
        let hub = WsHub::start();
        let (slow, slow_out) = Connection::new(Identity::from("slow"), 1);
        let (b, mut b_out) = connect("b");

        hub.register(slow).await;
        hub.register(b).await;
        assert_eq!(next_event(&mut b_out).await, presence(&["b", "slow"]));

        // The first message fills slow's queue, the second overflows it
        let (first, second) = (new_message(1), new_message(2));
        hub.broadcast(first.clone()).await;
        hub.broadcast(second.clone()).await;

        assert_eq!(next_event(&mut b_out).await, first);
        assert_eq!(next_event(&mut b_out).await, second);
        assert_eq!(next_event(&mut b_out).await, presence(&["b"]));
        assert!(slow_out.is_closed());
        assert_eq!(hub.online().await, vec![Identity::from("b")]);
    }

    #[tokio::test]
    async fn test_dead_writer_is_unregistered_on_broadcast() {
        let hub = WsHub::start();
        let (a, mut a_out) = connect("a");
        let (gone, gone_out) = connect("gone");
        hub.register(a).await;
        hub.register(gone).await;
        settle(&hub).await;
        while a_out.try_next().is_some() {}
        drop(gone_out);

        let message = new_message(1);
        hub.broadcast(message.clone()).await;
        assert_eq!(next_event(&mut a_out).await, message);
        assert_eq!(next_event(&mut a_out).await, presence(&["a"]));
        assert_eq!(hub.online().await, vec![Identity::from("a")]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_everything() {
        let hub = WsHub::start();
        let (a, a_out) = connect("a");
        let (b, b_out) = connect("b");
        hub.register(a).await;
        hub.register(b).await;

        hub.shutdown().await;
        assert!(a_out.is_closed());
        assert!(b_out.is_closed());

        // Handle stays usable but the directory is gone
        assert!(hub.online().await.is_empty());
        assert!(hub.lookup(&Identity::from("a")).await.is_none());
        let (late, _late_out) = connect("late");
        hub.register(late).await;
        assert!(hub.online().await.is_empty());
    }
}
