//! Presence assembly (SPEC_FULL.md §4.5).
//!
//! Grounded on `_generate_sync_entry_for_presence` in
//! `synapse/handlers/sync.py`: incremental fetches include offline states,
//! initial fetches only online peers; newly-visible users (from newly-joined
//! rooms, or users who just joined a room the caller is already in) are
//! merged in as synthesized current-state events, deduped by user id.

use std::collections::BTreeMap;

use ruma::OwnedUserId;
use serde_json::Value as JsonValue;

use crate::{collaborators::{FilterCollection, PresenceSource}, token::StreamToken};

pub async fn assemble_presence(
	presence: &dyn PresenceSource,
	filter: &dyn FilterCollection,
	user: &OwnedUserId,
	from_key: u64,
	is_incremental: bool,
	extra_users: &[OwnedUserId],
) -> corridor_core::Result<(Vec<JsonValue>, StreamToken)> {
	let (mut events, to_key) = presence.get_new_presence_events(user, from_key, is_incremental).await?;

	if !extra_users.is_empty() {
		let extra_users: Vec<OwnedUserId> = extra_users.iter().filter(|id| *id != user).cloned().collect();
		if !extra_users.is_empty() {
			let synthesized = presence.get_states(&extra_users, true).await?;
			events.extend(synthesized);
		}
	}

	let deduped = dedupe_by_user_keep_last(events);
	let filtered = filter.filter_presence(deduped);

	Ok((filtered, StreamToken::zero().with_presence_key(to_key)))
}

fn dedupe_by_user_keep_last(events: Vec<JsonValue>) -> Vec<JsonValue> {
	let mut by_user: BTreeMap<String, JsonValue> = BTreeMap::new();
	for event in events {
		if let Some(sender) = event.get("sender").and_then(JsonValue::as_str) {
			by_user.insert(sender.to_owned(), event);
		}
	}
	by_user.into_values().collect()
}

#[cfg(test)]
mod tests {
	use async_trait::async_trait;
	use ruma::owned_user_id;

	use super::*;

	struct NoopFilter;
	impl FilterCollection for NoopFilter {
		fn timeline_limit(&self) -> usize { 10 }
		fn ephemeral_limit(&self) -> usize { 10 }
	}

	struct Fixture {
		incremental: Vec<JsonValue>,
		extra: Vec<JsonValue>,
		to_key: u64,
	}

	#[async_trait]
	impl PresenceSource for Fixture {
		async fn get_states(&self, _users: &[OwnedUserId], _as_event: bool) -> corridor_core::Result<Vec<JsonValue>> {
			Ok(self.extra.clone())
		}

		async fn get_new_presence_events(
			&self,
			_user: &OwnedUserId,
			_from_key: u64,
			_include_offline: bool,
		) -> corridor_core::Result<(Vec<JsonValue>, u64)> {
			Ok((self.incremental.clone(), self.to_key))
		}
	}

	#[test]
	fn dedupe_keeps_last_event_per_user() {
		let events = vec![
			serde_json::json!({"sender": "@a:example.org", "content": {"presence": "online"}}),
			serde_json::json!({"sender": "@a:example.org", "content": {"presence": "offline"}}),
		];
		let deduped = dedupe_by_user_keep_last(events);
		assert_eq!(deduped.len(), 1);
		assert_eq!(deduped[0]["content"]["presence"], "offline");
	}

	#[tokio::test]
	async fn merges_extra_users_current_presence() {
		let fixture = Fixture {
			incremental: vec![serde_json::json!({"sender": "@a:example.org", "content": {"presence": "online"}})],
			extra: vec![serde_json::json!({"sender": "@b:example.org", "content": {"presence": "online"}})],
			to_key: 5,
		};
		let (events, advanced) = assemble_presence(&fixture, &NoopFilter, &owned_user_id!("@alice:example.org"), 0, true, &[owned_user_id!("@b:example.org")])
			.await
			.expect("assembly succeeds");
		assert_eq!(events.len(), 2);
		assert_eq!(advanced.presence_key, 5);
	}

	#[tokio::test]
	async fn excludes_self_from_extra_users() {
		let fixture = Fixture { incremental: vec![], extra: vec![serde_json::json!({"sender": "@alice:example.org"})], to_key: 1 };
		let (events, _) = assemble_presence(&fixture, &NoopFilter, &owned_user_id!("@alice:example.org"), 0, true, &[owned_user_id!("@alice:example.org")])
			.await
			.expect("assembly succeeds");
		assert!(events.is_empty(), "self must never be included as an extra user");
	}
}
