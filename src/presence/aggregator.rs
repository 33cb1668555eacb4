use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

use crate::models::ParticipantRecord;

/// The two derived views the UI consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceViews {
    /// Other online users, in arrival order. Never contains the local user.
    pub peers: Vec<ParticipantRecord>,
    /// Users grouped by the entity they currently have open. Participants
    /// without a focus don't appear here.
    pub by_focus: HashMap<String, Vec<ParticipantRecord>>,
}

#[derive(Default)]
struct Inner {
    order: Vec<String>,
    records: HashMap<String, ParticipantRecord>,
}

/// Turns session events into the derived views.
///
/// The aggregator is the sole writer to its views; consumers read the
/// current snapshot or watch for changes. Events must be applied in delivery
/// order. `announced_at` only arbitrates between two records for the same
/// user, never across users.
pub struct PresenceAggregator {
    local_id: String,
    inner: Mutex<Inner>,
    views_tx: watch::Sender<PresenceViews>,
}

impl PresenceAggregator {
    pub fn new(local_id: impl Into<String>) -> Arc<Self> {
        let (views_tx, _) = watch::channel(PresenceViews::default());
        Arc::new(Self {
            local_id: local_id.into(),
            inner: Mutex::new(Inner::default()),
            views_tx,
        })
    }

    /// Replace the current view with an authoritative snapshot. Entries the
    /// snapshot no longer lists are dropped, never merged around.
    pub fn apply_sync(&self, state: &HashMap<String, ParticipantRecord>) {
        let mut guard = self.inner.lock().expect("aggregator state poisoned");
        let inner = &mut *guard;

        let mut records = HashMap::new();
        for (user_id, record) in state {
            if *user_id == self.local_id {
                continue;
            }
            records.insert(user_id.clone(), record.clone());
        }

        // Survivors keep their arrival order; genuinely new entries append
        // in sorted order so the flat view is deterministic for a snapshot.
        let mut order: Vec<String> = inner
            .order
            .iter()
            .filter(|id| records.contains_key(*id))
            .cloned()
            .collect();
        let mut fresh: Vec<String> = records
            .keys()
            .filter(|id| !order.contains(*id))
            .cloned()
            .collect();
        fresh.sort();
        order.extend(fresh);

        inner.order = order;
        inner.records = records;
        self.publish(inner);
    }

    /// Apply a join/update delta for one participant. A record older than
    /// the one already held (network replay) is discarded.
    pub fn apply_join(&self, record: &ParticipantRecord) {
        if record.user_id == self.local_id {
            return;
        }
        let mut guard = self.inner.lock().expect("aggregator state poisoned");
        let inner = &mut *guard;

        match inner.records.get(&record.user_id) {
            Some(existing) if !record.supersedes(existing) => {
                debug!("Discarding stale announcement from user {}", record.user_id);
                return;
            }
            Some(_) => {}
            None => inner.order.push(record.user_id.clone()),
        }
        inner.records.insert(record.user_id.clone(), record.clone());
        self.publish(inner);
    }

    /// Remove a participant after a leave delta.
    pub fn apply_leave(&self, user_id: &str) {
        let mut guard = self.inner.lock().expect("aggregator state poisoned");
        let inner = &mut *guard;

        if inner.records.remove(user_id).is_none() {
            return;
        }
        inner.order.retain(|id| id != user_id);
        self.publish(inner);
    }

    /// Current snapshot of both views.
    pub fn views(&self) -> PresenceViews {
        self.views_tx.borrow().clone()
    }

    /// Watch for view changes without polling.
    pub fn subscribe(&self) -> watch::Receiver<PresenceViews> {
        self.views_tx.subscribe()
    }

    fn publish(&self, inner: &Inner) {
        let peers: Vec<ParticipantRecord> = inner
            .order
            .iter()
            .filter_map(|id| inner.records.get(id).cloned())
            .collect();

        let mut by_focus: HashMap<String, Vec<ParticipantRecord>> = HashMap::new();
        for record in &peers {
            if let Some(focus) = &record.focus_ref {
                by_focus.entry(focus.clone()).or_default().push(record.clone());
            }
        }

        // send_replace stores the value even when nobody subscribed yet, so
        // views() and late subscribers always see the current snapshot.
        self.views_tx.send_replace(PresenceViews { peers, by_focus });
    }
}
