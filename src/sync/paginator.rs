//! Lazy-loading paginator (SPEC_FULL.md §4.7).
//!
//! Grounded on `_get_room_timestamps_at_token` and the pagination_state /
//! tag-rule block (lines 749-895) of `synapse/handlers/sync.py`: rank rooms
//! by most-recent-visible-event timestamp, take the first `limit` as this
//! poll's page, and carry the boundary forward as `PaginationState`.

use std::collections::{BTreeMap, BTreeSet};

use ruma::{MilliSecondsSinceUnixEpoch, OwnedRoomId};

use crate::{
	collaborators::{PaginationConfigTags, Storage, TagChange},
	model::MaterializationPlan,
	token::{PaginationOrder, PaginationState, TagPolicy},
};

pub struct PaginateOutcome {
	pub plans: Vec<MaterializationPlan>,
	pub pagination_state: Option<PaginationState>,
	pub limited: bool,
}

/// Ranks `room_map` (room -> latest visible activity) descending by
/// timestamp, keeps the first `limit` rooms, and classifies the rest as
/// deferred. Rooms without a known timestamp sort last.
#[must_use]
fn rank_rooms(room_map: &BTreeMap<OwnedRoomId, MilliSecondsSinceUnixEpoch>) -> Vec<(OwnedRoomId, MilliSecondsSinceUnixEpoch)> {
	let mut ranked: Vec<_> = room_map.iter().map(|(room, ts)| (room.clone(), *ts)).collect();
	ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
	ranked
}

/// Applies the paging decision to a plan set already produced by the
/// room-change resolver. `room_map` must cover every room with a candidate
/// plan. `previous_boundary` is the `pagination_state.value` from the
/// client's cursor, if this is a page continuation.
pub fn paginate(
	mut plans: Vec<MaterializationPlan>,
	room_map: &BTreeMap<OwnedRoomId, MilliSecondsSinceUnixEpoch>,
	limit: usize,
	extras_limit: usize,
	tags: PaginationConfigTags,
	now_token: crate::token::StreamToken,
	previous_boundary: Option<MilliSecondsSinceUnixEpoch>,
) -> PaginateOutcome {
	// A page continuation only ranks among rooms the client hasn't seen yet.
	// Strict `<`: a room whose activity exactly equals the previous page edge
	// counts as already delivered, not as newly eligible (resolved Open
	// Question, SPEC_FULL.md §9).
	let pool: BTreeMap<OwnedRoomId, MilliSecondsSinceUnixEpoch> = match previous_boundary {
		Some(prev) => room_map.iter().filter(|(_, ts)| **ts < prev).map(|(room, ts)| (room.clone(), *ts)).collect(),
		None => room_map.clone(),
	};

	let page_size = limit.saturating_add(extras_limit);

	let (page_rooms, extra_rooms, pagination_state, limited): (
		Option<BTreeSet<OwnedRoomId>>,
		BTreeSet<OwnedRoomId>,
		Option<PaginationState>,
		bool,
	) = if pool.len() <= limit {
		(None, BTreeSet::new(), None, false)
	} else {
		let ranked = rank_rooms(&pool);
		let page = &ranked[..page_size.min(ranked.len())];
		let page_rooms: BTreeSet<_> = page.iter().map(|(room, _)| room.clone()).collect();
		// Rooms ranked beyond the client's own `pagination_limit` but within
		// the extended page: delivered via `extras.paginate`, seen afresh.
		let extra_rooms: BTreeSet<_> = page.iter().skip(limit.min(page.len())).map(|(room, _)| room.clone()).collect();
		let boundary_value = page.last().map(|(_, ts)| *ts).unwrap_or_else(|| MilliSecondsSinceUnixEpoch(0u32.into()));
		let state = PaginationState {
			order: PaginationOrder::TimestampDescending,
			value: boundary_value,
			limit: page_size,
			tags: match tags {
				PaginationConfigTags::IncludeAll => TagPolicy::IncludeAll,
				PaginationConfigTags::Ignore => TagPolicy::Ignore,
			},
		};
		(Some(page_rooms), extra_rooms, Some(state), true)
	};

	plans.retain(|plan| {
		if previous_boundary.is_some() && !pool.contains_key(&plan.room_id) {
			return false;
		}
		match &page_rooms {
			Some(page_rooms) => page_rooms.contains(&plan.room_id),
			None => true,
		}
	});

	// A plan enters this page without the client having seen it before
	// unless it was already mid-incremental-sync (a `since_token` it wasn't
	// just re-admitted for); such plans need a full resync, not a delta.
	for plan in &mut plans {
		let already_known = plan.since_token.is_some() && !plan.newly_joined;
		if !already_known {
			plan.since_token = None;
			plan.full_state = true;
			plan.would_require_resync = true;
		}
	}

	// `extras.paginate` entries: the client is seeing them afresh regardless
	// of prior sync state.
	for plan in &mut plans {
		if extra_rooms.contains(&plan.room_id) {
			plan.always_include = true;
			plan.full_state = true;
			plan.since_token = None;
			plan.would_require_resync = true;
			plan.upto_token = now_token;
		}
	}

	PaginateOutcome { plans, pagination_state, limited }
}

/// Applied by the orchestrator to each room identified as "missing state"
/// (its latest activity sorts older than the page boundary, so it was cut
/// from this poll and has not been materialized) once storage has classified
/// its tag change; the pure ranking step in [`paginate`] has no access to tag
/// data so this stays a separate fold (SPEC_FULL.md §4.7 tag rules).
pub fn fold_in_tag_change(plan: &mut MaterializationPlan, change: TagChange, has_any_tag: bool) {
	match change {
		TagChange::NewlyTagged => {
			plan.since_token = None;
			plan.always_include = true;
			plan.full_state = true;
			plan.would_require_resync = true;
			plan.events = None;
			plan.synced = true;
		},
		TagChange::AllRemoved => {
			plan.always_include = true;
			plan.synced = false;
		},
		TagChange::StillTagged if has_any_tag => {
			plan.always_include = true;
		},
		TagChange::StillTagged => {},
	}
}

pub async fn room_timestamps_at_token(
	storage: &dyn Storage,
	rooms: &[OwnedRoomId],
	now_token: crate::token::StreamToken,
) -> corridor_core::Result<BTreeMap<OwnedRoomId, MilliSecondsSinceUnixEpoch>> {
	let mut out = BTreeMap::new();
	for room in rooms {
		if let Some(ts) = storage.get_last_event_ts_for_room(room, now_token).await? {
			out.insert(room.clone(), ts);
		}
	}
	Ok(out)
}
