use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::participant::ParticipantRecord;

/// Events a room delivers to its members, in delivery order.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum PresenceEvent {
    /// Full-state snapshot, authoritative over any prior deltas.
    #[serde(rename = "sync")]
    Sync {
        state: HashMap<String, ParticipantRecord>,
    },
    /// A participant joined or re-announced itself.
    #[serde(rename = "join", rename_all = "camelCase")]
    Join { record: ParticipantRecord },
    /// A participant left the room.
    #[serde(rename = "leave", rename_all = "camelCase")]
    Leave { user_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_by_type() {
        let event: PresenceEvent = serde_json::from_str(
            r#"{ "type": "leave", "userId": "u2" }"#,
        )
        .unwrap();
        match event {
            PresenceEvent::Leave { user_id } => assert_eq!(user_id, "u2"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
