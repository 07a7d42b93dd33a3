//! The top-level `SyncResultBuilder` (SPEC_FULL.md §4.2).
//!
//! Grounded on `SyncHandler.generate_sync_result` in
//! `synapse/handlers/sync.py`: obtain the current token, assemble account
//! data, assemble rooms (threading the resulting newly-joined sets into
//! presence), assemble presence, then package the final result.

use std::{collections::BTreeMap, sync::Arc};

use ruma::{OwnedRoomId, OwnedUserId};

use crate::{
	account_data,
	collaborators::{
		EventSource, FilterCollection, PaginationConfigTags, PresenceSource, PushRuleFormatter, Storage, VisibilityFilter,
	},
	materializer::MaterializedRoom,
	model::SyncResult,
	presence,
	rooms::{self, RoomsAssemblyInput},
	token::{BatchCursor, StreamToken},
};

/// Owns its collaborators behind `Arc` rather than borrowing them, so a
/// `SyncRequest` paired with a `Collaborators` can be moved into a `'static`
/// future and shared across concurrent callers by `cache::ResponseCache`.
#[derive(Clone)]
pub struct Collaborators {
	pub storage: Arc<dyn Storage + Send + Sync>,
	pub typing_source: Arc<dyn EventSource + Send + Sync>,
	pub receipt_source: Arc<dyn EventSource + Send + Sync>,
	pub presence_source: Arc<dyn PresenceSource + Send + Sync>,
	pub visibility: Arc<dyn VisibilityFilter + Send + Sync>,
	pub push_rules: Arc<dyn PushRuleFormatter + Send + Sync>,
	pub filter: Arc<dyn FilterCollection + Send + Sync>,
}

#[derive(Clone)]
pub struct SyncRequest {
	pub user: OwnedUserId,
	pub cursor: Option<BatchCursor>,
	pub full_state: bool,
	pub peek_rooms: BTreeMap<OwnedRoomId, Option<StreamToken>>,
	pub pagination_limit: Option<usize>,
	pub pagination_extra_limit: usize,
	pub pagination_tags: PaginationConfigTags,
	pub fanout_concurrency: usize,
}

/// Runs one full sync computation to completion (SPEC_FULL.md §4.2 steps
/// 1-5). Does not itself long-poll; `cache::wait_for_sync` wraps this.
pub async fn build_sync_result(collaborators: &Collaborators, request: &SyncRequest) -> corridor_core::Result<SyncResult> {
	let since = request.cursor.as_ref().map(|cursor| cursor.stream_token);
	let now_token = resolve_now_token(collaborators, since).await?;

	let account_data_result = account_data::assemble_account_data(
		collaborators.storage.as_ref(),
		collaborators.push_rules.as_ref(),
		collaborators.filter.as_ref(),
		&request.user,
		since,
		now_token,
	)
	.await?;

	let previous_pagination_boundary = request.cursor.as_ref().and_then(|cursor| cursor.pagination_state.as_ref()).map(|state| state.value);

	let assembly = rooms::assemble_rooms(RoomsAssemblyInput {
		storage: collaborators.storage.as_ref(),
		visibility: collaborators.visibility.as_ref(),
		filter: collaborators.filter.as_ref(),
		typing_source: collaborators.typing_source.as_ref(),
		receipt_source: collaborators.receipt_source.as_ref(),
		user: &request.user,
		since,
		now_token,
		full_state: request.full_state,
		peek_rooms: &request.peek_rooms,
		fanout_concurrency: request.fanout_concurrency,
		pagination_limit: request.pagination_limit,
		pagination_extra_limit: request.pagination_extra_limit,
		pagination_tags: request.pagination_tags,
		previous_pagination_boundary,
		account_data_by_room: &account_data_result.by_room,
		typing_from: request.cursor.as_ref().map_or(0, |cursor| cursor.stream_token.typing_key),
		receipt_from: request.cursor.as_ref().map_or(0, |cursor| cursor.stream_token.receipt_key),
	})
	.await?;

	let (joined, archived, errors) = split_materialized(assembly.materialized, assembly.errors);

	let newly_joined_room_members: Vec<OwnedUserId> = assembly.newly_joined_users.into_iter().collect();
	let (presence_events, advanced_presence) = presence::assemble_presence(
		collaborators.presence_source.as_ref(),
		collaborators.filter.as_ref(),
		&request.user,
		request.cursor.as_ref().map_or(0, |cursor| cursor.stream_token.presence_key),
		since.is_some(),
		&newly_joined_room_members,
	)
	.await?;

	let next_token = now_token.merge(advanced_presence).merge(assembly.advanced_ephemeral);

	Ok(SyncResult {
		next_batch: BatchCursor { stream_token: next_token, pagination_state: assembly.pagination_state },
		joined,
		invited: assembly.invited,
		archived,
		errors,
		presence: presence_events,
		account_data: account_data_result.global,
		pagination_limited: assembly.pagination_limited,
	})
}

async fn resolve_now_token(collaborators: &Collaborators, since: Option<StreamToken>) -> corridor_core::Result<StreamToken> {
	let room_key = collaborators.storage.get_current_room_key().await?;
	let account_data_key = since.map_or(room_key, |token| token.account_data_key);
	let push_rules_key = since.map_or(room_key, |token| token.push_rules_key);
	Ok(StreamToken { room_key, account_data_key, push_rules_key, ..StreamToken::zero() })
}

fn split_materialized(
	materialized: Vec<MaterializedRoom>,
	errors: Vec<crate::model::RoomSyncError>,
) -> (Vec<crate::model::JoinedRoom>, Vec<crate::model::ArchivedRoom>, Vec<crate::model::RoomSyncError>) {
	let mut joined = Vec::new();
	let mut archived = Vec::new();
	for room in materialized {
		match room {
			MaterializedRoom::Joined(room) => joined.push(room),
			MaterializedRoom::Archived(room) => archived.push(room),
		}
	}
	(joined, archived, errors)
}
