use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, broadcast, mpsc};
use uuid::Uuid;

use huddle_types::events::ServerEvent;
use huddle_types::models::OnlineUser;

pub type ConnectionId = Uuid;

/// Envelope carried on the broadcast channel. `exclude` names a connection
/// that must not receive the event (typing indicators skip their origin).
#[derive(Debug, Clone)]
pub struct Outbound {
    pub exclude: Option<ConnectionId>,
    pub event: ServerEvent,
}

/// One announced connection. A user may hold several at once (multi-device).
struct Connection {
    user_id: Uuid,
    joined_at: DateTime<Utc>,
}

struct UserEntry {
    profile: OnlineUser,
    connections: HashSet<ConnectionId>,
}

/// Connection registry state. All mutation happens through the methods
/// below under the dispatcher's write lock, so consumers can never observe
/// a half-applied connection event.
///
/// Invariant: `users` holds exactly the user ids that own at least one
/// entry in `connections`, and each `UserEntry::connections` set is
/// non-empty.
#[derive(Default)]
struct Registry {
    /// Delivery channels, one per open socket (announced or not).
    peers: HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>,
    /// Announced connections only.
    connections: HashMap<ConnectionId, Connection>,
    /// user id -> profile + owning connections.
    users: HashMap<Uuid, UserEntry>,
}

impl Registry {
    /// Bind a connection to a resolved user identity. Re-announcing the
    /// same pair refreshes the profile; re-announcing under a different
    /// user first detaches the old binding. Returns true if the roster
    /// may have changed.
    fn announce(&mut self, conn_id: ConnectionId, profile: OnlineUser) -> bool {
        if let Some(existing) = self.connections.get(&conn_id) {
            if existing.user_id == profile.id {
                if let Some(entry) = self.users.get_mut(&profile.id) {
                    entry.profile = profile;
                }
                return true;
            }
            let _ = self.remove(conn_id);
        }

        let user_id = profile.id;
        self.connections.insert(
            conn_id,
            Connection {
                user_id,
                joined_at: Utc::now(),
            },
        );
        self.users
            .entry(user_id)
            .or_insert_with(|| UserEntry {
                profile: profile.clone(),
                connections: HashSet::new(),
            })
            .connections
            .insert(conn_id);
        // Latest announce wins for the display fields
        if let Some(entry) = self.users.get_mut(&user_id) {
            entry.profile = profile;
        }
        true
    }

    /// Remove one announced connection. The user stays online while other
    /// connections remain. Returns the removed entry, if any.
    fn remove(&mut self, conn_id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.remove(&conn_id)?;

        if let Some(entry) = self.users.get_mut(&conn.user_id) {
            entry.connections.remove(&conn_id);
            if entry.connections.is_empty() {
                self.users.remove(&conn.user_id);
            }
        }
        Some(conn)
    }

    /// The de-duplicated online snapshot: one entry per user with at least
    /// one live connection, sorted by (name, id) so broadcasts are
    /// deterministic.
    fn online_users(&self) -> Vec<OnlineUser> {
        let mut users: Vec<OnlineUser> =
            self.users.values().map(|e| e.profile.clone()).collect();
        users.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        users
    }
}

/// Tracks connected clients and fans events out to them.
///
/// Cloneable handle around shared state, injected into every connection
/// task at construction — there is no process-global registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Broadcast channel for server events — every connected client's send
    /// task subscribes and forwards to its socket.
    broadcast_tx: broadcast::Sender<Outbound>,

    registry: RwLock<Registry>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    /// Subscribe to broadcast events. Each connection's send task calls
    /// this once.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to all connected clients.
    pub fn broadcast(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(Outbound {
            exclude: None,
            event,
        });
    }

    /// Broadcast to all connected clients except the originating connection.
    pub fn broadcast_except(&self, origin: ConnectionId, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(Outbound {
            exclude: Some(origin),
            event,
        });
    }

    /// Register a delivery channel for a freshly accepted socket. The
    /// connection is not online until it announces a user identity.
    pub async fn attach(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.registry.write().await.peers.insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Bind a connection to a resolved user and push the fresh roster to
    /// everyone. The registry mutation and the roster broadcast happen
    /// under one write lock: a single logical step per connection event.
    pub async fn announce(&self, conn_id: ConnectionId, profile: OnlineUser) {
        let mut registry = self.inner.registry.write().await;
        if registry.announce(conn_id, profile) {
            let users = registry.online_users();
            let _ = self.inner.broadcast_tx.send(Outbound {
                exclude: None,
                event: ServerEvent::OnlineRoster { users },
            });
        }
    }

    /// Drop a connection's delivery channel and registry entry. Pushes the
    /// shrunken roster only if the connection had been announced.
    pub async fn detach(&self, conn_id: ConnectionId) {
        let mut registry = self.inner.registry.write().await;
        registry.peers.remove(&conn_id);
        if let Some(conn) = registry.remove(conn_id) {
            tracing::debug!(
                "connection {} of user {} was online for {}s",
                conn_id,
                conn.user_id,
                (Utc::now() - conn.joined_at).num_seconds()
            );
            let users = registry.online_users();
            let _ = self.inner.broadcast_tx.send(Outbound {
                exclude: None,
                event: ServerEvent::OnlineRoster { users },
            });
        }
    }

    /// Current online snapshot.
    pub async fn online_users(&self) -> Vec<OnlineUser> {
        self.inner.registry.read().await.online_users()
    }

    /// Distinct user ids currently online. Notification fan-out targets
    /// these minus the actor.
    pub async fn online_user_ids(&self) -> Vec<Uuid> {
        self.inner
            .registry
            .read()
            .await
            .users
            .keys()
            .copied()
            .collect()
    }

    /// Send a targeted event to every connection a user currently holds.
    pub async fn send_to_user(&self, user_id: Uuid, event: ServerEvent) {
        let registry = self.inner.registry.read().await;
        let Some(entry) = registry.users.get(&user_id) else {
            return;
        };
        for conn_id in &entry.connections {
            if let Some(tx) = registry.peers.get(conn_id) {
                let _ = tx.send(event.clone());
            }
        }
    }
}
