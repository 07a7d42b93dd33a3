//! Ephemeral aggregator: typing and receipt events per room (SPEC_FULL.md
//! §4.6 step "early exit" inputs, §6 "Event sources").
//!
//! Grounded on `ephemeral_by_room` in `synapse/handlers/sync.py`, which
//! queries the typing and receipt event sources independently and groups the
//! results by room id.

use std::collections::BTreeMap;

use ruma::OwnedRoomId;

use crate::{
	collaborators::{EventSource, FilterCollection},
	model::Event,
	token::StreamToken,
};

/// Fetches typing and receipt updates visible to `rooms` since
/// `now_token`'s previous sub-positions, advancing `now_token`'s
/// `typing_key`/`receipt_key` to whatever the sources actually returned.
pub async fn ephemeral_by_room(
	typing_source: &dyn EventSource,
	receipt_source: &dyn EventSource,
	filter: &dyn FilterCollection,
	user: &ruma::OwnedUserId,
	rooms: &[OwnedRoomId],
	typing_from: u64,
	receipt_from: u64,
) -> corridor_core::Result<(BTreeMap<OwnedRoomId, Vec<Event>>, StreamToken)> {
	let limit = filter.ephemeral_limit();

	let (typing_events, typing_to) = typing_source.get_new_events(user, typing_from, limit, rooms).await?;
	let (receipt_events, receipt_to) = receipt_source.get_new_events(user, receipt_from, limit, rooms).await?;

	let mut by_room: BTreeMap<OwnedRoomId, Vec<Event>> = BTreeMap::new();
	for event in typing_events.into_iter().chain(receipt_events) {
		by_room.entry(event.room_id.clone()).or_default().push(event);
	}
	for events in by_room.values_mut() {
		*events = filter.filter_room_ephemeral(std::mem::take(events));
	}

	let advanced = StreamToken::zero().with_typing_key(typing_to).with_receipt_key(receipt_to);
	Ok((by_room, advanced))
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use ruma::{owned_room_id, owned_user_id};

	use super::*;

	struct NoopFilter;
	impl FilterCollection for NoopFilter {
		fn timeline_limit(&self) -> usize { 10 }
		fn ephemeral_limit(&self) -> usize { 5 }
	}

	struct FixedSource {
		events: Vec<Event>,
		to_key: u64,
	}

	#[async_trait]
	impl EventSource for FixedSource {
		async fn get_current_key(&self) -> corridor_core::Result<u64> { Ok(self.to_key) }

		async fn get_new_events(
			&self,
			_user: &ruma::OwnedUserId,
			_from_key: u64,
			_limit: usize,
			_room_ids: &[OwnedRoomId],
		) -> corridor_core::Result<(Vec<Event>, u64)> {
			Ok((self.events.clone(), self.to_key))
		}
	}

	fn typing_event(room: &str) -> Event {
		Event {
			event_id: ruma::OwnedEventId::try_from("$t:example.org").unwrap(),
			room_id: ruma::OwnedRoomId::try_from(room).unwrap(),
			event_type: "m.typing".to_owned(),
			state_key: None,
			sender: owned_user_id!("@alice:example.org"),
			membership: None,
			origin_server_ts: ruma::MilliSecondsSinceUnixEpoch(ruma::UInt::new(0).unwrap()),
			before: 0,
			is_state: false,
			content: serde_json::json!({}),
		}
	}

	#[tokio::test]
	async fn groups_events_by_room_and_advances_token() {
		let typing = FixedSource { events: vec![typing_event("!a:example.org")], to_key: 7 };
		let receipts = FixedSource { events: vec![], to_key: 3 };

		let (by_room, advanced) = ephemeral_by_room(
			&typing,
			&receipts,
			&NoopFilter,
			&owned_user_id!("@alice:example.org"),
			&[owned_room_id!("!a:example.org")],
			0,
			0,
		)
		.await
		.expect("aggregation succeeds");

		assert_eq!(by_room.len(), 1);
		assert_eq!(advanced.typing_key, 7);
		assert_eq!(advanced.receipt_key, 3);
	}
}
