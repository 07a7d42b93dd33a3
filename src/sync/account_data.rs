//! Account-data, tags, and push-rules assembly (SPEC_FULL.md §4.3).
//!
//! Grounded on `_generate_sync_entry_for_account_data` in
//! `synapse/handlers/sync.py`: incremental fetch when a cursor is present,
//! full fetch on initial sync, and an `m.push_rules` entry appended whenever
//! the rules changed (or unconditionally on initial sync).

use std::collections::BTreeMap;

use ruma::{OwnedRoomId, OwnedUserId};
use serde_json::Value as JsonValue;

use crate::{collaborators::{FilterCollection, PushRuleFormatter, Storage}, token::StreamToken};

pub struct AccountDataResult {
	pub global: Vec<JsonValue>,
	pub by_room: BTreeMap<OwnedRoomId, Vec<JsonValue>>,
}

pub async fn assemble_account_data(
	storage: &dyn Storage,
	push_rules: &dyn PushRuleFormatter,
	filter: &dyn FilterCollection,
	user: &OwnedUserId,
	since: Option<StreamToken>,
	now_token: StreamToken,
) -> corridor_core::Result<AccountDataResult> {
	let mut global = storage.get_account_data(user, since).await?;

	let push_rules_changed = match since {
		Some(since) => storage.push_rules_changed(user, since).await?,
		None => true,
	};
	if push_rules_changed {
		let raw_rules = storage.current_push_rules(user).await?;
		let formatted = push_rules.format_push_rules_for_user(user, raw_rules).await?;
		global.push(serde_json::json!({ "type": "m.push_rules", "content": formatted }));
	}

	global = filter.filter_account_data(global);

	let rooms_for_user = storage.get_rooms_for_user(user).await?;
	let mut by_room: BTreeMap<OwnedRoomId, Vec<JsonValue>> = BTreeMap::new();
	for room_id in &rooms_for_user {
		let room_data = storage.get_room_account_data(user, room_id, since).await?;
		if !room_data.is_empty() {
			by_room.insert(room_id.clone(), room_data);
		}
	}

	let tag_updates = storage.get_tags_for_user(user, since).await?;
	for (room_id, tags) in tag_updates {
		by_room.entry(room_id).or_default().push(serde_json::json!({ "type": "m.tag", "content": { "tags": tags } }));
	}

	for room_data in by_room.values_mut() {
		*room_data = filter.filter_room_account_data(std::mem::take(room_data));
	}

	let _ = now_token;
	Ok(AccountDataResult { global, by_room })
}
