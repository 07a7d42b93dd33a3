//! External collaborator contracts (SPEC_FULL.md §6). These are the traits
//! the engine is built against instead of a concrete storage/federation
//! stack; grounded on the method surface Synapse's `SyncHandler` calls on
//! `self.store`/`self.notifier`/`self.presence_handler` in
//! `synapse/handlers/sync.py`, expressed as `async_trait` objects the way a
//! federated chat server's own internal services are normally exposed to
//! their callers.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use ruma::{MilliSecondsSinceUnixEpoch, OwnedRoomId, OwnedUserId};
use serde_json::Value as JsonValue;

use crate::{
	model::{Event, RoomStateSnapshot},
	token::StreamToken,
};

#[async_trait]
pub trait Storage: Send + Sync {
	/// The server's current room-stream position (SPEC_FULL.md §4.2 step 1,
	/// `now_token`).
	async fn get_current_room_key(&self) -> corridor_core::Result<u64>;

	async fn get_rooms_for_user(&self, user: &OwnedUserId) -> corridor_core::Result<Vec<OwnedRoomId>>;

	async fn get_membership_changes(
		&self,
		user: &OwnedUserId,
		from: StreamToken,
		to: StreamToken,
	) -> corridor_core::Result<Vec<Event>>;

	async fn get_room_events_stream(
		&self,
		rooms: &[OwnedRoomId],
		from: StreamToken,
		to: StreamToken,
		limit: usize,
	) -> corridor_core::Result<BTreeMap<OwnedRoomId, Vec<Event>>>;

	async fn get_recent_events_for_room(
		&self,
		room: &OwnedRoomId,
		end: StreamToken,
		limit: usize,
	) -> corridor_core::Result<Vec<Event>>;

	async fn get_state_for_event(&self, room: &OwnedRoomId, at: StreamToken) -> corridor_core::Result<RoomStateSnapshot>;

	async fn get_last_event_ts_for_room(
		&self,
		room: &OwnedRoomId,
		at: StreamToken,
	) -> corridor_core::Result<Option<MilliSecondsSinceUnixEpoch>>;

	async fn get_last_receipt_event_id_for_user(
		&self,
		user: &OwnedUserId,
		room: &OwnedRoomId,
	) -> corridor_core::Result<Option<ruma::OwnedEventId>>;

	async fn get_unread_notification_counts(
		&self,
		user: &OwnedUserId,
		room: &OwnedRoomId,
		since_event: &ruma::OwnedEventId,
	) -> corridor_core::Result<(u64, u64)>;

	async fn get_account_data(
		&self,
		user: &OwnedUserId,
		since: Option<StreamToken>,
	) -> corridor_core::Result<Vec<JsonValue>>;

	async fn get_room_account_data(
		&self,
		user: &OwnedUserId,
		room: &OwnedRoomId,
		since: Option<StreamToken>,
	) -> corridor_core::Result<Vec<JsonValue>>;

	async fn get_tag_changes(
		&self,
		user: &OwnedUserId,
		since: StreamToken,
	) -> corridor_core::Result<BTreeMap<OwnedRoomId, TagChange>>;

	/// Per-room `m.tag` content to deliver this poll: every tagged room on an
	/// initial sync (`since = None`), or just the rooms whose tags changed
	/// since `since` on an incremental one.
	async fn get_tags_for_user(
		&self,
		user: &OwnedUserId,
		since: Option<StreamToken>,
	) -> corridor_core::Result<BTreeMap<OwnedRoomId, JsonValue>>;

	async fn push_rules_changed(&self, user: &OwnedUserId, since: StreamToken) -> corridor_core::Result<bool>;

	async fn current_push_rules(&self, user: &OwnedUserId) -> corridor_core::Result<JsonValue>;

	async fn ignored_users(&self, user: &OwnedUserId) -> corridor_core::Result<Vec<OwnedUserId>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagChange {
	NewlyTagged,
	AllRemoved,
	StillTagged,
}

/// One logical update stream (typing, receipts, presence): `get_current_token`
/// plus a bounded `get_new_events` fetch (SPEC_FULL.md §6 "Event sources").
#[async_trait]
pub trait EventSource: Send + Sync {
	async fn get_current_key(&self) -> corridor_core::Result<u64>;

	async fn get_new_events(
		&self,
		user: &OwnedUserId,
		from_key: u64,
		limit: usize,
		room_ids: &[OwnedRoomId],
	) -> corridor_core::Result<(Vec<Event>, u64)>;
}

/// Wakes a waiting long-poll whenever the user's notification bus advances
/// (SPEC_FULL.md §4.1, §6). `wait_for_events` invokes `recompute` every time
/// something changes and returns the first non-empty result it produces, or
/// `None` on timeout.
pub type Recompute = std::sync::Arc<
	dyn Fn() -> futures::future::BoxFuture<'static, corridor_core::Result<crate::model::SyncResult>> + Send + Sync,
>;

#[async_trait]
pub trait Notifier: Send + Sync {
	async fn wait_for_events(
		&self,
		user: &OwnedUserId,
		timeout: Duration,
		from_token: StreamToken,
		recompute: Recompute,
	) -> corridor_core::Result<Option<crate::model::SyncResult>>;
}

#[async_trait]
pub trait PresenceSource: Send + Sync {
	async fn get_states(&self, users: &[OwnedUserId], as_event: bool) -> corridor_core::Result<Vec<JsonValue>>;

	/// Incremental presence stream: updates since `from_key`. `include_offline`
	/// mirrors Synapse's initial-vs-incremental distinction: initial syncs
	/// omit offline peers (SPEC_FULL.md §4.5).
	async fn get_new_presence_events(
		&self,
		user: &OwnedUserId,
		from_key: u64,
		include_offline: bool,
	) -> corridor_core::Result<(Vec<JsonValue>, u64)>;
}

#[async_trait]
pub trait VisibilityFilter: Send + Sync {
	async fn filter_events_for_client(
		&self,
		user: &OwnedUserId,
		events: Vec<Event>,
	) -> corridor_core::Result<Vec<Event>>;
}

#[async_trait]
pub trait PushRuleFormatter: Send + Sync {
	async fn format_push_rules_for_user(&self, user: &OwnedUserId, rules: JsonValue) -> corridor_core::Result<JsonValue>;
}

/// Predicates and limits a client's filter imposes (SPEC_FULL.md §6 "Filter
/// collection").
pub trait FilterCollection: Send + Sync {
	fn filter_room_timeline(&self, events: Vec<Event>) -> Vec<Event> { events }
	fn filter_room_state(&self, events: Vec<Event>) -> Vec<Event> { events }
	fn filter_presence(&self, events: Vec<JsonValue>) -> Vec<JsonValue> { events }
	fn filter_account_data(&self, events: Vec<JsonValue>) -> Vec<JsonValue> { events }
	fn filter_room_account_data(&self, events: Vec<JsonValue>) -> Vec<JsonValue> { events }
	fn filter_room_ephemeral(&self, events: Vec<Event>) -> Vec<Event> { events }

	fn timeline_limit(&self) -> usize;
	fn ephemeral_limit(&self) -> usize;
	fn include_leave(&self) -> bool { false }
}

/// Client-supplied pagination request; validated the way Synapse's
/// `SyncPaginationConfig.from_json` validates `order`/`tags`/`limit`
/// (`synapse/handlers/sync.py`), raising a 400-mapped error on anything
/// outside the accepted values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginationConfig {
	pub order: PaginationConfigOrder,
	pub tags: PaginationConfigTags,
	pub limit: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaginationConfigOrder {
	TimestampDescending,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaginationConfigTags {
	IncludeAll,
	Ignore,
}

const MAX_PAGINATION_LIMIT: usize = 1000;

impl PaginationConfig {
	pub fn from_raw(order: &str, tags: &str, limit: usize) -> corridor_core::Result<Self> {
		let order = match order {
			"o" => PaginationConfigOrder::TimestampDescending,
			other => return corridor_core::Err!(Pagination("unknown order {other:?}")),
		};
		let tags = match tags {
			"include_all" => PaginationConfigTags::IncludeAll,
			"ignore" => PaginationConfigTags::Ignore,
			other => return corridor_core::Err!(Pagination("unknown tags policy {other:?}")),
		};
		if limit == 0 || limit > MAX_PAGINATION_LIMIT {
			return corridor_core::Err!(Pagination("limit {limit} out of range"));
		}
		Ok(Self { order, tags, limit })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_unknown_order() {
		assert!(PaginationConfig::from_raw("z", "ignore", 10).is_err());
	}

	#[test]
	fn rejects_zero_limit() {
		assert!(PaginationConfig::from_raw("o", "ignore", 0).is_err());
	}

	#[test]
	fn rejects_oversized_limit() {
		assert!(PaginationConfig::from_raw("o", "ignore", MAX_PAGINATION_LIMIT + 1).is_err());
	}

	#[test]
	fn accepts_valid_config() {
		let config = PaginationConfig::from_raw("o", "include_all", 25).expect("valid config");
		assert_eq!(config.limit, 25);
		assert_eq!(config.tags, PaginationConfigTags::IncludeAll);
	}
}
