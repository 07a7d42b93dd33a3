//! Rooms assembly (SPEC_FULL.md §4.4): the room-change resolver plus the
//! peek map and bounded-concurrency fan-out into the materializer.
//!
//! Grounded on `_get_rooms_changed` (incremental path) and `_get_all_rooms`
//! (initial-sync path) in `synapse/handlers/sync.py`.

use std::collections::{BTreeMap, BTreeSet};

use futures::{StreamExt, stream};
use ruma::{OwnedRoomId, OwnedUserId};
use serde_json::Value as JsonValue;

use crate::{
	collaborators::{EventSource, FilterCollection, PaginationConfigTags, Storage, TagChange, VisibilityFilter},
	ephemeral,
	materializer::{self, MaterializedRoom},
	model::{ERRCODE_CANNOT_PEEK, Event, Membership, MaterializationPlan, RoomResultType, RoomSyncError},
	paginator,
	token::{PaginationState, StreamToken},
};

pub struct RoomsAssembly {
	pub materialized: Vec<MaterializedRoom>,
	pub invited: Vec<crate::model::InvitedRoom>,
	pub errors: Vec<RoomSyncError>,
	pub newly_joined_rooms: BTreeSet<OwnedRoomId>,
	pub newly_joined_users: BTreeSet<OwnedUserId>,
	pub pagination_state: Option<PaginationState>,
	pub pagination_limited: bool,
	pub advanced_ephemeral: StreamToken,
}

pub struct RoomsAssemblyInput<'a> {
	pub storage: &'a dyn Storage,
	pub visibility: &'a dyn VisibilityFilter,
	pub filter: &'a dyn FilterCollection,
	pub typing_source: &'a dyn EventSource,
	pub receipt_source: &'a dyn EventSource,
	pub user: &'a OwnedUserId,
	pub since: Option<StreamToken>,
	pub now_token: StreamToken,
	pub full_state: bool,
	pub peek_rooms: &'a BTreeMap<OwnedRoomId, Option<StreamToken>>,
	pub fanout_concurrency: usize,
	/// Present when the client requested lazy-loading pagination or is
	/// continuing a previous page (SPEC_FULL.md §4.4.d).
	pub pagination_limit: Option<usize>,
	pub pagination_extra_limit: usize,
	pub pagination_tags: PaginationConfigTags,
	pub previous_pagination_boundary: Option<ruma::MilliSecondsSinceUnixEpoch>,
	pub account_data_by_room: &'a BTreeMap<OwnedRoomId, Vec<JsonValue>>,
	pub typing_from: u64,
	pub receipt_from: u64,
}

/// Builds the full candidate plan set (membership transitions plus
/// unchanged-but-still-joined rooms), resolves peeks, then fans out the
/// materializer with bounded concurrency (SPEC_FULL.md §4.4.e, §5).
pub async fn assemble_rooms(input: RoomsAssemblyInput<'_>) -> corridor_core::Result<RoomsAssembly> {
	let ignored_users: BTreeSet<OwnedUserId> = input.storage.ignored_users(input.user).await?.into_iter().collect();

	let mut invited = Vec::new();
	let mut errors = Vec::new();
	let mut plans: Vec<MaterializationPlan> = Vec::new();
	let mut newly_joined_rooms = BTreeSet::new();

	match input.since {
		Some(since) if !input.full_state => {
			let changes = input
				.storage
				.get_membership_changes(input.user, since, input.now_token)
				.await?;
			let mut by_room: BTreeMap<OwnedRoomId, Vec<Event>> = BTreeMap::new();
			for change in changes {
				by_room.entry(change.room_id.clone()).or_default().push(change);
			}

			let currently_joined: BTreeSet<OwnedRoomId> = input.storage.get_rooms_for_user(input.user).await?.into_iter().collect();

			for (room_id, mut room_changes) in by_room {
				room_changes.sort_by_key(|event| event.before);
				let became_join = room_changes
					.iter()
					.any(|event| event.membership == Some(Membership::Join));

				if currently_joined.contains(&room_id) || became_join {
					newly_joined_rooms.insert(room_id.clone());
					let mut plan = MaterializationPlan::new(room_id, RoomResultType::Joined, input.now_token);
					plan.newly_joined = true;
					plan.full_state = true;
					plans.push(plan);
					continue;
				}

				let latest = room_changes.last().expect("non-empty by construction");
				match latest.membership {
					Some(Membership::Invite) if !ignored_users.contains(&latest.sender) => {
						invited.push(crate::model::InvitedRoom { room_id, invite_event: latest.clone() });
					},
					Some(Membership::Leave | Membership::Ban) => {
						let mut plan = MaterializationPlan::new(room_id, RoomResultType::Archived, latest.before.into_stream_token());
						plan.since_token = Some(since);
						plans.push(plan);
					},
					_ => {},
				}
			}

			for room_id in currently_joined {
				if plans.iter().any(|plan| plan.room_id == room_id) {
					continue;
				}
				let events = input
					.storage
					.get_room_events_stream(&[room_id.clone()], since, input.now_token, input.filter.timeline_limit() + 1)
					.await?
					.remove(&room_id);
				let mut plan = MaterializationPlan::new(room_id, RoomResultType::Joined, input.now_token);
				plan.since_token = Some(since);
				plan.events = events;
				plans.push(plan);
			}
		},
		_ => {
			let rooms = input.storage.get_rooms_for_user(input.user).await?;
			for room_id in rooms {
				let mut plan = MaterializationPlan::new(room_id, RoomResultType::Joined, input.now_token);
				plan.full_state = true;
				plans.push(plan);
			}
		},
	}

	for (room_id, since) in input.peek_rooms {
		if plans.iter().any(|plan| &plan.room_id == room_id) || invited.iter().any(|room| &room.room_id == room_id) {
			continue;
		}
		let is_joined = input.storage.get_rooms_for_user(input.user).await?.contains(room_id);
		if is_joined {
			let mut plan = MaterializationPlan::new(room_id.clone(), RoomResultType::Joined, input.now_token);
			plan.since_token = *since;
			plan.full_state = since.is_none();
			plans.push(plan);
		} else {
			errors.push(RoomSyncError {
				room_id: room_id.clone(),
				errcode: ERRCODE_CANNOT_PEEK,
				message: format!("{room_id} cannot be peeked"),
			});
		}
	}

	let (plans, pagination_state, pagination_limited) = if let Some(limit) = input.pagination_limit {
		let room_ids: Vec<OwnedRoomId> = plans.iter().map(|plan| plan.room_id.clone()).collect();
		let room_map = paginator::room_timestamps_at_token(input.storage, &room_ids, input.now_token).await?;
		let outcome = paginator::paginate(
			plans,
			&room_map,
			limit,
			input.pagination_extra_limit,
			input.pagination_tags,
			input.now_token,
			input.previous_pagination_boundary,
		);

		let mut plans = outcome.plans;
		// The tag force-include rules only apply once a previous page has
		// already cut rooms from view (SPEC_FULL.md §4.7 "continuing an
		// earlier page"); a first page has nothing to reclassify, and there
		// is no meaningful `since` to ask storage for tag changes against.
		if input.pagination_tags == PaginationConfigTags::IncludeAll && input.previous_pagination_boundary.is_some() {
			let boundary = outcome.pagination_state.as_ref().map(|state| state.value);
			let in_page: BTreeSet<OwnedRoomId> = plans.iter().map(|plan| plan.room_id.clone()).collect();
			let missing_state_rooms: Vec<OwnedRoomId> = room_map
				.iter()
				.filter(|(room, ts)| !in_page.contains(*room) && boundary.is_some_and(|boundary| **ts < boundary))
				.map(|(room, _)| room.clone())
				.collect();
			if !missing_state_rooms.is_empty() {
				let since = input.since.unwrap_or(StreamToken::zero());
				let tag_changes = input.storage.get_tag_changes(input.user, since).await?;
				for room_id in missing_state_rooms {
					let change = tag_changes.get(&room_id).copied().unwrap_or(TagChange::StillTagged);
					let mut plan = MaterializationPlan::new(room_id, RoomResultType::Joined, input.now_token);
					paginator::fold_in_tag_change(&mut plan, change, change != TagChange::StillTagged);
					if plan.always_include {
						plans.push(plan);
					}
				}
			}
		}

		(plans, outcome.pagination_state, outcome.limited)
	} else {
		(plans, None, false)
	};

	// Ephemeral events and account data must be known before the
	// materializer decides whether a room contributes anything at all
	// (SPEC_FULL.md §4.6 step 1) — a room whose only signal is a typing
	// notification or an account-data change must still be reported.
	let joined_room_ids: Vec<OwnedRoomId> = plans
		.iter()
		.filter(|plan| plan.rtype == RoomResultType::Joined)
		.map(|plan| plan.room_id.clone())
		.collect();
	let (ephemeral_by_room, advanced_ephemeral) = ephemeral::ephemeral_by_room(
		input.typing_source,
		input.receipt_source,
		input.filter,
		input.user,
		&joined_room_ids,
		input.typing_from,
		input.receipt_from,
	)
	.await?;

	let fanout = input.fanout_concurrency.max(1);
	let materialized: Vec<MaterializedRoom> = stream::iter(plans.into_iter().map(|plan| {
		let room_ephemeral = ephemeral_by_room.get(&plan.room_id).cloned().unwrap_or_default();
		let room_account_data = input.account_data_by_room.get(&plan.room_id).cloned().unwrap_or_default();
		materializer::materialize(input.storage, input.visibility, input.filter, input.user, plan, room_ephemeral, room_account_data)
	}))
	.buffer_unordered(fanout)
	.filter_map(|result| async move { result.transpose() })
	.collect::<Vec<_>>()
	.await
	.into_iter()
	.collect::<corridor_core::Result<Vec<_>>>()?;

	let newly_joined_users = collect_newly_joined_users(&materialized);

	Ok(RoomsAssembly {
		materialized,
		invited,
		errors,
		newly_joined_rooms,
		newly_joined_users,
		pagination_state,
		pagination_limited,
		advanced_ephemeral,
	})
}

/// Scans every joined result's timeline and state for `m.room.member` events
/// with `membership = join` (SPEC_FULL.md §4.4.f).
fn collect_newly_joined_users(materialized: &[MaterializedRoom]) -> BTreeSet<OwnedUserId> {
	let mut users = BTreeSet::new();
	for room in materialized {
		let MaterializedRoom::Joined(joined) = room else { continue };
		for event in joined.timeline.events.iter().chain(joined.state_delta.iter()) {
			if event.event_type == "m.room.member" && event.membership == Some(Membership::Join) {
				users.insert(event.sender.clone());
			}
		}
	}
	users
}

trait IntoStreamToken {
	fn into_stream_token(self) -> StreamToken;
}

impl IntoStreamToken for u64 {
	fn into_stream_token(self) -> StreamToken { StreamToken::zero().with_room_key(self) }
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn u64_converts_to_room_key_only_token() {
		let token = 42u64.into_stream_token();
		assert_eq!(token.room_key, 42);
		assert_eq!(token.presence_key, 0);
	}
}
