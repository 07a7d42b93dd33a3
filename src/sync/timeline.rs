//! The timeline loader (SPEC_FULL.md §4.8).
//!
//! Grounded on `_load_filtered_recents` in `synapse/handlers/sync.py`: a
//! back-fill loop bounded by `load_limit = max(timeline_limit * 2, 10)` and a
//! 5-attempt cap, re-filtering at every step and stopping early once enough
//! events have survived filtering or the store runs dry.

use ruma::OwnedRoomId;

use crate::{
	collaborators::{FilterCollection, Storage, VisibilityFilter},
	model::{Event, TimelineBatch},
	token::StreamToken,
};

const MAX_BACKFILL_ATTEMPTS: usize = 5;
const MIN_LOAD_LIMIT: usize = 10;

fn load_limit(timeline_limit: usize) -> usize { std::cmp::max(timeline_limit.saturating_mul(2), MIN_LOAD_LIMIT) }

/// Loads a room's recent timeline, applying the filter and then the
/// visibility filter, back-filling from storage when the caller didn't
/// already supply enough candidate events.
pub async fn load_timeline(
	storage: &dyn Storage,
	visibility: &dyn VisibilityFilter,
	filter: &dyn FilterCollection,
	user: &ruma::OwnedUserId,
	room_id: &OwnedRoomId,
	now_token: StreamToken,
	since_token: Option<StreamToken>,
	recents: Option<Vec<Event>>,
	newly_joined_room: bool,
) -> corridor_core::Result<TimelineBatch> {
	let timeline_limit = filter.timeline_limit();

	let limited = recents.is_none() || newly_joined_room || recents.as_ref().is_some_and(|r| r.len() > timeline_limit);

	if let Some(recents) = recents
		&& !limited
	{
		let filtered = filter.filter_room_timeline(recents);
		let filtered = visibility.filter_events_for_client(user, filtered).await?;
		return Ok(TimelineBatch { prev_batch: since_token.or(Some(now_token)), events: filtered, limited: false });
	}

	backfill(storage, visibility, filter, user, room_id, now_token, since_token, recents, newly_joined_room, timeline_limit)
		.await
}

#[allow(clippy::too_many_arguments)]
async fn backfill(
	storage: &dyn Storage,
	visibility: &dyn VisibilityFilter,
	filter: &dyn FilterCollection,
	user: &ruma::OwnedUserId,
	room_id: &OwnedRoomId,
	now_token: StreamToken,
	since_token: Option<StreamToken>,
	recents: Option<Vec<Event>>,
	newly_joined_room: bool,
	timeline_limit: usize,
) -> corridor_core::Result<TimelineBatch> {
	let load_limit_n = load_limit(timeline_limit);
	let lower_bound = if newly_joined_room { None } else { since_token };

	let mut collected: Vec<Event> = Vec::new();
	let mut end_key = now_token;
	let mut limited = true;

	if let Some(recents) = recents {
		let filtered = filter.filter_room_timeline(recents);
		collected = visibility.filter_events_for_client(user, filtered).await?;
		if let Some(first) = collected.first() {
			end_key = end_key.with_room_key(first.before);
		}
	}

	for _attempt in 0..MAX_BACKFILL_ATTEMPTS {
		if collected.len() >= timeline_limit {
			break;
		}

		let since_key = lower_bound.unwrap_or(StreamToken::zero());
		let fetched = storage.get_recent_events_for_room(room_id, end_key, load_limit_n).await?;
		let fetched_count = fetched.len();

		let mut filtered = filter.filter_room_timeline(fetched);
		filtered = visibility.filter_events_for_client(user, filtered).await?;

		if let Some(first) = filtered.first() {
			end_key = end_key.with_room_key(first.before);
		}
		filtered.extend(collected);
		collected = filtered;

		if fetched_count < load_limit_n {
			limited = false;
			break;
		}
		if end_key.room_key <= since_key.room_key {
			break;
		}
	}

	if collected.len() > timeline_limit {
		let drop = collected.len() - timeline_limit;
		collected.drain(0..drop);
	}

	let prev_batch = collected.first().map(|event| now_token.with_room_key(event.before));

	Ok(TimelineBatch { prev_batch: prev_batch.or(Some(now_token)), events: collected, limited })
}
