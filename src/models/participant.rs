use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One user's advertised presence state within a room.
///
/// `user_id` is the dedup key: a room's derived view holds at most one
/// record per user, and `announced_at` decides which of two records for the
/// same user is authoritative.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub user_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_ref: Option<String>,
    pub announced_at: DateTime<Utc>,
    /// Entity the participant currently has open; `None` means online but
    /// not focused on anything specific.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus_ref: Option<String>,
}

impl ParticipantRecord {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
            announced_at: Utc::now(),
            focus_ref: None,
        }
    }

    pub fn with_focus(mut self, focus_ref: Option<String>) -> Self {
        self.focus_ref = focus_ref;
        self
    }

    /// Whether this record wins over `other` for the same user.
    /// Ties go to the incoming record: the most recent event wins.
    pub fn supersedes(&self, other: &ParticipantRecord) -> bool {
        self.announced_at >= other.announced_at
    }

    /// Decode a record from an untyped transport payload.
    ///
    /// Malformed or missing optional fields default instead of propagating;
    /// a payload without a usable `userId` is rejected outright.
    pub fn from_payload(value: &Value) -> Option<ParticipantRecord> {
        let user_id = value.get("userId")?.as_str()?;
        if user_id.is_empty() {
            return None;
        }
        let display_name = value
            .get("displayName")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(user_id)
            .to_string();
        let avatar_ref = value
            .get("avatarRef")
            .and_then(Value::as_str)
            .map(str::to_string);
        let announced_at = value
            .get("announcedAt")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now);
        let focus_ref = value
            .get("focusRef")
            .and_then(Value::as_str)
            .map(str::to_string);
        Some(ParticipantRecord {
            user_id: user_id.to_string(),
            display_name,
            avatar_ref,
            announced_at,
            focus_ref,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn payload_with_all_fields() {
        let value = json!({
            "userId": "u1",
            "displayName": "Ada",
            "avatarRef": "avatars/u1.png",
            "announcedAt": "2026-03-01T12:00:00Z",
            "focusRef": "p1",
        });
        let record = ParticipantRecord::from_payload(&value).unwrap();
        assert_eq!(record.user_id, "u1");
        assert_eq!(record.display_name, "Ada");
        assert_eq!(record.avatar_ref.as_deref(), Some("avatars/u1.png"));
        assert_eq!(record.focus_ref.as_deref(), Some("p1"));
    }

    #[test]
    fn missing_display_name_falls_back_to_id() {
        let value = json!({ "userId": "u1" });
        let record = ParticipantRecord::from_payload(&value).unwrap();
        assert_eq!(record.display_name, "u1");
        assert!(record.avatar_ref.is_none());
        assert!(record.focus_ref.is_none());
    }

    #[test]
    fn missing_user_id_is_rejected() {
        assert!(ParticipantRecord::from_payload(&json!({ "displayName": "Ada" })).is_none());
        assert!(ParticipantRecord::from_payload(&json!({ "userId": "" })).is_none());
        assert!(ParticipantRecord::from_payload(&json!({ "userId": 42 })).is_none());
    }

    #[test]
    fn malformed_timestamp_defaults() {
        let value = json!({ "userId": "u1", "announcedAt": "not-a-date" });
        assert!(ParticipantRecord::from_payload(&value).is_some());
    }

    #[test]
    fn newer_record_supersedes_and_ties_go_to_incoming() {
        let t1 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap();
        let mut a = ParticipantRecord::new("u1", "Ada");
        let mut b = a.clone();
        a.announced_at = t1;
        b.announced_at = t2;
        assert!(b.supersedes(&a));
        assert!(!a.supersedes(&b));
        let c = a.clone();
        assert!(c.supersedes(&a));
    }
}
