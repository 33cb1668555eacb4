/// Maximum number of identifiers contributing to a room name.
const MAX_IDS: usize = 10;

/// Maximum room-name length accepted by the channel transport.
const MAX_LEN: usize = 50;

/// Derive a stable room name from the set of entity ids a view is rendering.
///
/// Identical sets produce identical names regardless of ordering or
/// duplicates, so independent clients with an overlapping working set
/// converge on the same channel. Returns `None` for an empty set: presence
/// is disabled for that render.
pub fn room_id<S: AsRef<str>>(entity_ids: &[S]) -> Option<String> {
    let mut ids: Vec<&str> = entity_ids
        .iter()
        .map(|id| id.as_ref())
        .filter(|id| !id.is_empty())
        .collect();
    if ids.is_empty() {
        return None;
    }

    ids.sort_unstable();
    ids.dedup();
    ids.truncate(MAX_IDS);

    let name = ids.join("-");
    Some(name.chars().take(MAX_LEN).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_does_not_matter() {
        let a = room_id(&["p2", "p1", "p3"]);
        let b = room_id(&["p3", "p2", "p1"]);
        let c = room_id(&["p1", "p3", "p2"]);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a, Some("p1-p2-p3".to_string()));
    }

    #[test]
    fn duplicates_collapse() {
        assert_eq!(room_id(&["p1", "p1", "p2"]), room_id(&["p2", "p1"]));
    }

    #[test]
    fn empty_set_disables_presence() {
        assert_eq!(room_id::<&str>(&[]), None);
        assert_eq!(room_id(&["", ""]), None);
    }

    #[test]
    fn large_sets_stay_bounded() {
        let ids: Vec<String> = (0..25).map(|i| format!("project-{:02}", i)).collect();
        let name = room_id(&ids).unwrap();
        assert!(name.chars().count() <= 50);

        let mut reversed = ids.clone();
        reversed.reverse();
        assert_eq!(room_id(&ids), room_id(&reversed));
    }

    #[test]
    fn single_id_is_its_own_room() {
        assert_eq!(room_id(&["p7"]), Some("p7".to_string()));
    }
}
