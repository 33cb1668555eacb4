use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::models::{ParticipantRecord, PresenceEvent};

/// Subscription status reported by the transport for one room membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Closed,
}

/// What a room member receives on its delivery channel, in delivery order.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Status(ChannelStatus),
    Event(PresenceEvent),
}

#[derive(Debug)]
pub enum TransportError {
    Unavailable,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unavailable => write!(f, "channel transport unavailable"),
        }
    }
}

impl std::error::Error for TransportError {}

/// The operations presence needs from a pub/sub transport.
///
/// Joins are deduplicated per `(room, key)`: rejoining under the same key
/// replaces the previous subscription rather than adding a second one.
/// Reconnect and backoff are the transport's concern; after a reconnect it
/// re-delivers a fresh sync on the same channel.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// Join a room under a per-client key and receive ordered delivery.
    async fn join(
        &self,
        room: &str,
        key: &str,
    ) -> Result<mpsc::Receiver<ChannelMessage>, TransportError>;

    /// Broadcast the caller's current self-state to the room.
    async fn broadcast(
        &self,
        room: &str,
        key: &str,
        record: ParticipantRecord,
    ) -> Result<(), TransportError>;

    /// Leave the room and release the subscription.
    async fn leave(&self, room: &str, key: &str);
}

struct Member {
    record: Option<ParticipantRecord>,
    tx: mpsc::Sender<ChannelMessage>,
}

/// In-process channel transport.
///
/// Keeps one member table per room and fans events out over per-member mpsc
/// channels. Delivery is best-effort. A member that stops draining its
/// channel misses events until the next sync. `resync` pushes an
/// authoritative snapshot to every member, which is how a hosted transport's
/// periodic sync shows up locally.
pub struct LocalChannelHub {
    rooms: RwLock<HashMap<String, HashMap<String, Member>>>,
    online: bool,
}

impl LocalChannelHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            online: true,
        })
    }

    /// A hub that refuses every join, for exercising degraded paths.
    pub fn offline() -> Arc<Self> {
        Arc::new(Self {
            rooms: RwLock::new(HashMap::new()),
            online: false,
        })
    }

    fn snapshot(members: &HashMap<String, Member>) -> HashMap<String, ParticipantRecord> {
        members
            .iter()
            .filter_map(|(key, member)| member.record.clone().map(|record| (key.clone(), record)))
            .collect()
    }

    /// Push a full-state snapshot to every member of the room.
    pub async fn resync(&self, room: &str) {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(room) else {
            return;
        };
        let state = Self::snapshot(members);
        for member in members.values() {
            let _ = member
                .tx
                .try_send(ChannelMessage::Event(PresenceEvent::Sync {
                    state: state.clone(),
                }));
        }
        debug!("Resynced room '{}' ({} members)", room, members.len());
    }

    /// Number of members currently subscribed to the room.
    pub async fn member_count(&self, room: &str) -> usize {
        self.rooms
            .read()
            .await
            .get(room)
            .map(|members| members.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl ChannelTransport for LocalChannelHub {
    async fn join(
        &self,
        room: &str,
        key: &str,
    ) -> Result<mpsc::Receiver<ChannelMessage>, TransportError> {
        if !self.online {
            warn!("Channel transport offline; join of room '{}' refused", room);
            return Err(TransportError::Unavailable);
        }

        let (tx, rx) = mpsc::channel(64);
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room.to_string()).or_default();

        // Rejoining under the same key replaces the old subscription.
        if let Some(old) = members.insert(
            key.to_string(),
            Member {
                record: None,
                tx: tx.clone(),
            },
        ) {
            let _ = old.tx.try_send(ChannelMessage::Status(ChannelStatus::Closed));
            debug!("Replaced subscription of '{}' in room '{}'", key, room);
        }

        // Establishment, then the current room state.
        let state = Self::snapshot(members);
        let _ = tx.try_send(ChannelMessage::Status(ChannelStatus::Subscribed));
        let _ = tx.try_send(ChannelMessage::Event(PresenceEvent::Sync { state }));

        info!("'{}' joined room '{}'", key, room);
        Ok(rx)
    }

    async fn broadcast(
        &self,
        room: &str,
        key: &str,
        record: ParticipantRecord,
    ) -> Result<(), TransportError> {
        // The wire form is untyped JSON. Decode on the receive side so a
        // malformed record is dropped at the boundary, not propagated.
        let payload = match serde_json::to_value(&record) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to encode presence payload from '{}': {}", key, e);
                return Ok(());
            }
        };
        let Some(record) = ParticipantRecord::from_payload(&payload) else {
            warn!("Dropping malformed presence payload from '{}'", key);
            return Ok(());
        };

        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return Err(TransportError::Unavailable);
        };
        match members.get_mut(key) {
            Some(member) => member.record = Some(record.clone()),
            None => return Err(TransportError::Unavailable),
        }

        for (other_key, other) in members.iter() {
            if other_key == key {
                continue; // no echo back to the sender
            }
            let _ = other.tx.try_send(ChannelMessage::Event(PresenceEvent::Join {
                record: record.clone(),
            }));
        }
        Ok(())
    }

    async fn leave(&self, room: &str, key: &str) {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(room) else {
            return;
        };
        if members.remove(key).is_none() {
            return;
        }

        for other in members.values() {
            let _ = other.tx.try_send(ChannelMessage::Event(PresenceEvent::Leave {
                user_id: key.to_string(),
            }));
        }
        if members.is_empty() {
            rooms.remove(room);
        }
        info!("'{}' left room '{}'", key, room);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn recv(rx: &mut mpsc::Receiver<ChannelMessage>) -> ChannelMessage {
        tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn join_delivers_subscribed_then_snapshot() {
        let hub = LocalChannelHub::new();
        let mut rx = hub.join("r1", "u1").await.unwrap();

        match recv(&mut rx).await {
            ChannelMessage::Status(ChannelStatus::Subscribed) => {}
            other => panic!("expected subscribed status, got {:?}", other),
        }
        match recv(&mut rx).await {
            ChannelMessage::Event(PresenceEvent::Sync { state }) => assert!(state.is_empty()),
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_peers_but_not_the_sender() {
        let hub = LocalChannelHub::new();
        let mut rx1 = hub.join("r1", "u1").await.unwrap();
        let mut rx2 = hub.join("r1", "u2").await.unwrap();

        hub.broadcast("r1", "u1", ParticipantRecord::new("u1", "Ada"))
            .await
            .unwrap();

        // u2 sees status, sync, then the join delta.
        recv(&mut rx2).await;
        recv(&mut rx2).await;
        match recv(&mut rx2).await {
            ChannelMessage::Event(PresenceEvent::Join { record }) => {
                assert_eq!(record.user_id, "u1");
            }
            other => panic!("expected join, got {:?}", other),
        }

        // u1 only ever saw its own establishment, no echo.
        recv(&mut rx1).await;
        recv(&mut rx1).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejoin_replaces_the_old_subscription() {
        let hub = LocalChannelHub::new();
        let mut old_rx = hub.join("r1", "u1").await.unwrap();
        let _new_rx = hub.join("r1", "u1").await.unwrap();

        recv(&mut old_rx).await; // subscribed
        recv(&mut old_rx).await; // sync
        match recv(&mut old_rx).await {
            ChannelMessage::Status(ChannelStatus::Closed) => {}
            other => panic!("expected closed status, got {:?}", other),
        }
        assert_eq!(hub.member_count("r1").await, 1);
    }

    #[tokio::test]
    async fn leave_notifies_remaining_members() {
        let hub = LocalChannelHub::new();
        let _rx1 = hub.join("r1", "u1").await.unwrap();
        let mut rx2 = hub.join("r1", "u2").await.unwrap();
        recv(&mut rx2).await;
        recv(&mut rx2).await;

        hub.leave("r1", "u1").await;
        match recv(&mut rx2).await {
            ChannelMessage::Event(PresenceEvent::Leave { user_id }) => assert_eq!(user_id, "u1"),
            other => panic!("expected leave, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resync_carries_announced_records() {
        let hub = LocalChannelHub::new();
        let _rx1 = hub.join("r1", "u1").await.unwrap();
        let mut rx2 = hub.join("r1", "u2").await.unwrap();
        recv(&mut rx2).await;
        recv(&mut rx2).await;

        hub.broadcast("r1", "u1", ParticipantRecord::new("u1", "Ada").with_focus(Some("p1".into())))
            .await
            .unwrap();
        recv(&mut rx2).await; // join delta

        hub.resync("r1").await;
        match recv(&mut rx2).await {
            ChannelMessage::Event(PresenceEvent::Sync { state }) => {
                assert_eq!(state.len(), 1);
                assert_eq!(state["u1"].focus_ref.as_deref(), Some("p1"));
            }
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_records_are_dropped_at_the_boundary() {
        let hub = LocalChannelHub::new();
        let _rx1 = hub.join("r1", "u1").await.unwrap();
        let mut rx2 = hub.join("r1", "u2").await.unwrap();
        recv(&mut rx2).await; // subscribed
        recv(&mut rx2).await; // sync

        // An empty user id never survives decoding on the receive side.
        hub.broadcast("r1", "u1", ParticipantRecord::new("", "Ada"))
            .await
            .unwrap();
        assert!(rx2.try_recv().is_err());

        // The rejected record must not surface through a later sync either.
        hub.resync("r1").await;
        match recv(&mut rx2).await {
            ChannelMessage::Event(PresenceEvent::Sync { state }) => assert!(state.is_empty()),
            other => panic!("expected sync, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn offline_hub_refuses_joins() {
        let hub = LocalChannelHub::offline();
        assert!(hub.join("r1", "u1").await.is_err());
    }
}
