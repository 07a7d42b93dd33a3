//! Room materializer (SPEC_FULL.md §4.6).
//!
//! Grounded on `_generate_room_entry` in `synapse/handlers/sync.py`,
//! including the `would_require_resync` reload-from-scratch branch (lines
//! 1206-1214 of the original) and the unread-notification lookup.

use ruma::OwnedUserId;
use serde_json::Value as JsonValue;

use crate::{
	collaborators::{FilterCollection, Storage, VisibilityFilter},
	model::{ArchivedRoom, Event, JoinedRoom, MaterializationPlan, RoomResultType, UnreadCounts},
	state_delta,
	timeline,
};

pub enum MaterializedRoom {
	Joined(JoinedRoom),
	Archived(ArchivedRoom),
}

/// Returns `None` when the room contributes nothing and should be dropped
/// silently (SPEC_FULL.md §4.6 step 1: no `always_include`, no account data,
/// no ephemerals, and an empty/unknown timeline). `ephemeral`/`account_data`
/// must be the room's actual typing/receipt/tag-and-account-data payload for
/// this poll, fetched by the caller *before* this decision is made — a room
/// whose only signal is a typing notification or an account-data change must
/// still be reported.
pub async fn materialize(
	storage: &dyn Storage,
	visibility: &dyn VisibilityFilter,
	filter: &dyn FilterCollection,
	user: &OwnedUserId,
	plan: MaterializationPlan,
	ephemeral: Vec<Event>,
	account_data: Vec<JsonValue>,
) -> corridor_core::Result<Option<MaterializedRoom>> {
	let has_other_signal = plan.always_include || plan.full_state || !ephemeral.is_empty() || !account_data.is_empty();

	if !has_other_signal && plan.events.as_ref().is_some_and(Vec::is_empty) {
		return Ok(None);
	}

	// Entering the lazy-loaded page from nowhere: the caller-supplied
	// `since_token` no longer describes anything the client has actually
	// seen, so it must be discarded and the room reloaded from its tip.
	let since_token = if plan.would_require_resync { None } else { plan.since_token };

	let batch = timeline::load_timeline(
		storage,
		visibility,
		filter,
		user,
		&plan.room_id,
		plan.upto_token,
		since_token,
		plan.events.clone(),
		plan.newly_joined,
	)
	.await?;

	if batch.is_empty() && !has_other_signal {
		return Ok(None);
	}

	let state_delta = compute_state_delta(storage, filter, &plan, &batch, since_token).await?;

	match plan.rtype {
		RoomResultType::Joined => {
			let unread = if let Some(receipt) = storage.get_last_receipt_event_id_for_user(user, &plan.room_id).await? {
				let (notify_count, highlight_count) = storage.get_unread_notification_counts(user, &plan.room_id, &receipt).await?;
				UnreadCounts { notify_count: Some(notify_count), highlight_count: Some(highlight_count) }
			} else {
				UnreadCounts::default()
			};

			Ok(Some(MaterializedRoom::Joined(JoinedRoom {
				room_id: plan.room_id,
				timeline: batch,
				state_delta,
				ephemeral,
				account_data,
				unread,
				synced: plan.synced,
			})))
		},
		RoomResultType::Archived => Ok(Some(MaterializedRoom::Archived(ArchivedRoom {
			room_id: plan.room_id,
			timeline: batch,
			state_delta,
			account_data,
		}))),
	}
}

async fn compute_state_delta(
	storage: &dyn Storage,
	filter: &dyn FilterCollection,
	plan: &MaterializationPlan,
	batch: &crate::model::TimelineBatch,
	since_token: Option<crate::token::StreamToken>,
) -> corridor_core::Result<Vec<crate::model::Event>> {
	if plan.full_state {
		let current = storage.get_state_for_event(&plan.room_id, plan.upto_token).await?;
		return Ok(state_delta::calculate_state_full(&current, filter));
	}

	if !batch.limited {
		// Incremental, unlimited: the timeline is contiguous from `previous`,
		// no state needs to accompany it (SPEC_FULL.md §4.9).
		return Ok(Vec::new());
	}

	let timeline_start_at = batch
		.events
		.first()
		.map(|event| crate::token::StreamToken::zero().with_room_key(event.before))
		.unwrap_or(plan.upto_token);

	let current = storage.get_state_for_event(&plan.room_id, plan.upto_token).await?;
	let timeline_start = storage.get_state_for_event(&plan.room_id, timeline_start_at).await?;
	let previous = match since_token {
		Some(since) => storage.get_state_for_event(&plan.room_id, since).await?,
		None => Default::default(),
	};

	Ok(state_delta::calculate_state(&Default::default(), &timeline_start, &previous, &current, filter))
}
