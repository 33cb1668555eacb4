use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::info;

use crate::models::ParticipantRecord;
use crate::presence::aggregator::{PresenceAggregator, PresenceViews};
use crate::presence::room_id::room_id;
use crate::presence::session::PresenceSession;
use crate::presence::transport::ChannelTransport;
use crate::services::profile_resolver::{Profile, ProfileResolver};

/// Presence for one room: the session, the aggregator fed by it, and the
/// cached identity announced on every focus change.
///
/// A client tracking several rooms holds one tracker per room; trackers
/// never share mutable state, so rooms cannot bleed into each other.
pub struct PresenceTracker {
    session: Arc<PresenceSession>,
    aggregator: Arc<PresenceAggregator>,
    self_id: String,
    profile: Profile,
}

impl PresenceTracker {
    /// Open presence for the given working set.
    ///
    /// Returns `None` when the set is empty: presence is disabled for that
    /// render. Otherwise derives the room name, joins it, wires session
    /// events into the aggregator and announces the local user as online.
    ///
    /// When the working set changes the owner must `close` this tracker
    /// before opening a new one, so one identity is never tracked in two
    /// rooms at once.
    pub async fn open<S: AsRef<str>>(
        transport: Arc<dyn ChannelTransport>,
        resolver: &ProfileResolver,
        entity_ids: &[S],
        self_id: &str,
    ) -> Option<PresenceTracker> {
        let room = room_id(entity_ids)?;
        let profile = resolver.resolve(self_id).await;

        let session = Arc::new(PresenceSession::new(
            transport,
            room.clone(),
            self_id.to_string(),
        ));
        let aggregator = PresenceAggregator::new(self_id);

        let agg = aggregator.clone();
        session.on_sync(move |state| agg.apply_sync(state)).await;
        let agg = aggregator.clone();
        session.on_join(move |record| agg.apply_join(record)).await;
        let agg = aggregator.clone();
        session.on_leave(move |user_id| agg.apply_leave(user_id)).await;

        session.open().await;

        let tracker = PresenceTracker {
            session,
            aggregator,
            self_id: self_id.to_string(),
            profile,
        };
        tracker.announce_self(None).await;
        info!("Presence tracking opened for room '{}'", room);
        Some(tracker)
    }

    /// Tell the room what the local user is looking at now.
    ///
    /// Fire-and-forget: the broadcast is issued and the call returns; peers
    /// observe the change whenever their next event arrives. No-op when the
    /// session never established or was closed.
    pub async fn set_focus(&self, focus_ref: Option<String>) {
        self.announce_self(focus_ref).await;
    }

    pub fn room(&self) -> &str {
        self.session.room()
    }

    /// Current snapshot of the derived views.
    pub fn views(&self) -> PresenceViews {
        self.aggregator.views()
    }

    /// Watch the derived views for changes.
    pub fn subscribe(&self) -> watch::Receiver<PresenceViews> {
        self.aggregator.subscribe()
    }

    /// Leave the room. Required on every exit path of the owning view,
    /// including room changes; calling it again is a no-op.
    pub async fn close(&self) {
        self.session.close().await;
    }

    async fn announce_self(&self, focus_ref: Option<String>) {
        let record = ParticipantRecord {
            user_id: self.self_id.clone(),
            display_name: self.profile.display_name.clone(),
            avatar_ref: self.profile.avatar_ref.clone(),
            announced_at: Utc::now(),
            focus_ref,
        };
        self.session.announce(record).await;
    }
}
