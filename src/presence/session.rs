use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{ParticipantRecord, PresenceEvent};
use crate::presence::transport::{ChannelMessage, ChannelStatus, ChannelTransport};

pub type SyncHandler = Box<dyn Fn(&HashMap<String, ParticipantRecord>) + Send + Sync>;
pub type JoinHandler = Box<dyn Fn(&ParticipantRecord) + Send + Sync>;
pub type LeaveHandler = Box<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed,
    Joining,
    Subscribed,
}

#[derive(Default)]
struct Handlers {
    on_sync: Vec<SyncHandler>,
    on_join: Vec<JoinHandler>,
    on_leave: Vec<LeaveHandler>,
}

struct SessionShared {
    phase: Phase,
    pending: Option<ParticipantRecord>,
    handlers: Handlers,
}

/// One subscription to a named room, with a typed self-state payload.
///
/// The session is the sole owner of its subscription handle: `open` joins,
/// `announce` broadcasts the caller's record, `close` releases the room.
/// Handlers run to completion in delivery order on a single receive task, so
/// no two handlers for the same room ever execute concurrently.
///
/// A session that fails to establish degrades to an empty view. `announce`
/// becomes a no-op and no handler ever fires. Reconnection is left to the
/// transport, which re-delivers a fresh sync on the same channel.
pub struct PresenceSession {
    room: String,
    self_id: String,
    transport: Arc<dyn ChannelTransport>,
    shared: Arc<Mutex<SessionShared>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceSession {
    pub fn new(transport: Arc<dyn ChannelTransport>, room: String, self_id: String) -> Self {
        Self {
            room,
            self_id,
            transport,
            shared: Arc::new(Mutex::new(SessionShared {
                phase: Phase::Closed,
                pending: None,
                handlers: Handlers::default(),
            })),
            task: Mutex::new(None),
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Invoked on every full-state snapshot. Sync is authoritative: treat it
    /// as "replace the current view", never as a merge.
    pub async fn on_sync(
        &self,
        handler: impl Fn(&HashMap<String, ParticipantRecord>) + Send + Sync + 'static,
    ) {
        self.shared.lock().await.handlers.on_sync.push(Box::new(handler));
    }

    /// Invoked on incremental join/update deltas.
    pub async fn on_join(&self, handler: impl Fn(&ParticipantRecord) + Send + Sync + 'static) {
        self.shared.lock().await.handlers.on_join.push(Box::new(handler));
    }

    /// Invoked when a participant leaves the room.
    pub async fn on_leave(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        self.shared.lock().await.handlers.on_leave.push(Box::new(handler));
    }

    /// Join the room under this session's identity.
    ///
    /// Idempotent per `(room, self_id)`: reopening replaces the live
    /// subscription instead of adding a second one. A transport failure is
    /// absorbed; the caller observes no peers rather than an error.
    pub async fn open(&self) {
        self.close().await;

        let rx = match self.transport.join(&self.room, &self.self_id).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(
                    "Failed to join room '{}': {}. Presence degraded to empty view.",
                    self.room, e
                );
                return;
            }
        };

        {
            let mut shared = self.shared.lock().await;
            shared.phase = Phase::Joining;
        }

        let session_id = Uuid::new_v4();
        info!(
            "Presence session {} opened for room '{}' as '{}'",
            session_id, self.room, self.self_id
        );

        let shared = self.shared.clone();
        let transport = self.transport.clone();
        let room = self.room.clone();
        let self_id = self.self_id.clone();
        let handle = tokio::spawn(async move {
            run_receive_loop(rx, shared, transport, room, self_id).await;
        });
        *self.task.lock().await = Some(handle);
    }

    /// Broadcast the caller's current record to the room.
    ///
    /// Between `open` and establishment the record is buffered, latest wins,
    /// and flushed once the transport reports subscribed. On a closed or
    /// never-established session this is a no-op.
    pub async fn announce(&self, record: ParticipantRecord) {
        {
            let mut shared = self.shared.lock().await;
            match shared.phase {
                Phase::Joining => {
                    shared.pending = Some(record);
                    return;
                }
                Phase::Closed => return,
                Phase::Subscribed => {}
            }
        }

        if let Err(e) = self.transport.broadcast(&self.room, &self.self_id, record).await {
            warn!("Announcement to room '{}' dropped: {}", self.room, e);
        }
    }

    pub async fn is_subscribed(&self) -> bool {
        self.shared.lock().await.phase == Phase::Subscribed
    }

    /// Release the room. Safe to call repeatedly; a closed session stays
    /// closed. Must run on every exit path of the owning lifecycle so no
    /// subscription leaks across a room change or teardown.
    pub async fn close(&self) {
        let was_open = {
            let mut shared = self.shared.lock().await;
            let was_open = shared.phase != Phase::Closed;
            shared.phase = Phase::Closed;
            shared.pending = None;
            was_open
        };

        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }

        if was_open {
            self.transport.leave(&self.room, &self.self_id).await;
            info!("Closed presence session for room '{}'", self.room);
        }
    }
}

async fn run_receive_loop(
    mut rx: mpsc::Receiver<ChannelMessage>,
    shared: Arc<Mutex<SessionShared>>,
    transport: Arc<dyn ChannelTransport>,
    room: String,
    self_id: String,
) {
    while let Some(message) = rx.recv().await {
        match message {
            ChannelMessage::Status(ChannelStatus::Subscribed) => {
                let pending = {
                    let mut shared = shared.lock().await;
                    if shared.phase == Phase::Closed {
                        break;
                    }
                    shared.phase = Phase::Subscribed;
                    shared.pending.take()
                };
                if let Some(record) = pending {
                    debug!("Flushing buffered announcement for room '{}'", room);
                    if let Err(e) = transport.broadcast(&room, &self_id, record).await {
                        warn!("Buffered announcement for room '{}' dropped: {}", room, e);
                    }
                }
            }
            ChannelMessage::Status(ChannelStatus::Closed) => {
                // The transport revoked this membership, e.g. a rejoin under
                // the same key replaced it. The session no longer owns a
                // subscription, so announcing must become a no-op.
                let mut shared = shared.lock().await;
                shared.phase = Phase::Closed;
                shared.pending = None;
                break;
            }
            ChannelMessage::Event(event) => {
                let shared = shared.lock().await;
                if shared.phase == Phase::Closed {
                    break;
                }
                dispatch(&shared.handlers, &event);
            }
        }
    }
    debug!("Receive loop for room '{}' ended", room);
}

fn dispatch(handlers: &Handlers, event: &PresenceEvent) {
    match event {
        PresenceEvent::Sync { state } => {
            for handler in &handlers.on_sync {
                handler(state);
            }
        }
        PresenceEvent::Join { record } => {
            for handler in &handlers.on_join {
                handler(record);
            }
        }
        PresenceEvent::Leave { user_id } => {
            for handler in &handlers.on_leave {
                handler(user_id);
            }
        }
    }
}
