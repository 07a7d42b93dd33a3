//! The state-delta calculator (SPEC_FULL.md §4.9).
//!
//! Grounded directly on `_calculate_state` in
//! `synapse/handlers/sync.py`: a pure set-algebra function over four state
//! snapshots, carried over unchanged in semantics. Only the container types
//! differ (a `BTreeMap<(type, state_key), Event>` here vs. a dict there).

use std::collections::BTreeSet;

use crate::{collaborators::FilterCollection, model::{Event, RoomStateSnapshot}};

/// `((current ∪ timeline_start) \ previous) \ timeline_contains`, by event id,
/// then materialized back into events and passed through the state filter.
#[must_use]
pub fn calculate_state(
	timeline_contains: &RoomStateSnapshot,
	timeline_start: &RoomStateSnapshot,
	previous: &RoomStateSnapshot,
	current: &RoomStateSnapshot,
	filter: &dyn FilterCollection,
) -> Vec<Event> {
	let tc_ids: BTreeSet<_> = timeline_contains.values().map(|event| &event.event_id).collect();
	let previous_ids: BTreeSet<_> = previous.values().map(|event| &event.event_id).collect();

	let mut by_key: std::collections::BTreeMap<(String, String), Event> = std::collections::BTreeMap::new();
	for (key, event) in current.iter().chain(timeline_start.iter()) {
		if previous_ids.contains(&event.event_id) || tc_ids.contains(&event.event_id) {
			continue;
		}
		by_key.insert(key.clone(), event.clone());
	}

	filter.filter_room_state(by_key.into_values().collect())
}

/// Full-state mode: everything visible at the tip, nothing to exclude.
#[must_use]
pub fn calculate_state_full(current: &RoomStateSnapshot, filter: &dyn FilterCollection) -> Vec<Event> {
	calculate_state(
		&RoomStateSnapshot::new(),
		current,
		&RoomStateSnapshot::new(),
		current,
		filter,
	)
}

#[cfg(test)]
mod tests {
	use ruma::{owned_room_id, owned_user_id};

	use super::*;
	use crate::model::Membership;

	struct NoopFilter;
	impl FilterCollection for NoopFilter {
		fn timeline_limit(&self) -> usize { 10 }
		fn ephemeral_limit(&self) -> usize { 10 }
	}

	fn state_event(id: &str, event_type: &str, state_key: &str) -> Event {
		Event {
			event_id: ruma::OwnedEventId::try_from(id).expect("valid event id"),
			room_id: owned_room_id!("!room:example.org"),
			event_type: event_type.to_owned(),
			state_key: Some(state_key.to_owned()),
			sender: owned_user_id!("@alice:example.org"),
			membership: if event_type == "m.room.member" { Some(Membership::Join) } else { None },
			origin_server_ts: ruma::MilliSecondsSinceUnixEpoch(ruma::UInt::new(0).unwrap()),
			before: 0,
			is_state: true,
			content: serde_json::json!({}),
		}
	}

	#[test]
	fn drops_events_already_known_previously() {
		let member = state_event("$a:example.org", "m.room.member", "@alice:example.org");
		let previous = RoomStateSnapshot::from([(("m.room.member".into(), "@alice:example.org".into()), member.clone())]);
		let current = previous.clone();

		let delta = calculate_state(&RoomStateSnapshot::new(), &RoomStateSnapshot::new(), &previous, &current, &NoopFilter);
		assert!(delta.is_empty(), "unchanged state must not be re-delivered");
	}

	#[test]
	fn includes_new_state_not_in_timeline() {
		let topic = state_event("$b:example.org", "m.room.topic", "");
		let current = RoomStateSnapshot::from([(("m.room.topic".into(), String::new()), topic.clone())]);

		let delta = calculate_state(
			&RoomStateSnapshot::new(),
			&RoomStateSnapshot::new(),
			&RoomStateSnapshot::new(),
			&current,
			&NoopFilter,
		);
		assert_eq!(delta, vec![topic]);
	}

	#[test]
	fn excludes_events_already_carried_in_timeline() {
		let topic = state_event("$c:example.org", "m.room.topic", "");
		let current = RoomStateSnapshot::from([(("m.room.topic".into(), String::new()), topic.clone())]);
		let timeline_contains = current.clone();

		let delta = calculate_state(&timeline_contains, &RoomStateSnapshot::new(), &RoomStateSnapshot::new(), &current, &NoopFilter);
		assert!(delta.is_empty(), "events already in the timeline are not duplicated into the state delta");
	}
}
