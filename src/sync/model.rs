//! Core value types shared by every component (SPEC_FULL.md §3).
//!
//! Grounded on the namedtuples in `synapse/handlers/sync.py`
//! (`TimelineBatch`, `JoinedSyncResult`, `ArchivedSyncResult`,
//! `InvitedSyncResult`, `ErrorSyncResult`), kept here as plain owned structs
//! rather than borrowing through the whole pipeline.

use std::collections::BTreeMap;

use ruma::{MilliSecondsSinceUnixEpoch, OwnedEventId, OwnedRoomId, OwnedUserId};
use serde_json::Value as JsonValue;

use crate::token::{BatchCursor, StreamToken};

/// An event, opaque in content to the engine beyond the fields it needs to
/// make delivery and ordering decisions (SPEC_FULL.md §3 "Event").
#[derive(Clone, Debug, PartialEq)]
pub struct Event {
	pub event_id: OwnedEventId,
	pub room_id: OwnedRoomId,
	pub event_type: String,
	pub state_key: Option<String>,
	pub sender: OwnedUserId,
	pub membership: Option<Membership>,
	pub origin_server_ts: MilliSecondsSinceUnixEpoch,
	/// Internal stream position immediately before this event.
	pub before: u64,
	pub is_state: bool,
	pub content: JsonValue,
}

impl Event {
	#[must_use]
	pub fn state_key_pair(&self) -> Option<(String, String)> {
		self.state_key.clone().map(|key| (self.event_type.clone(), key))
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Membership {
	Join,
	Invite,
	Leave,
	Ban,
	Knock,
}

/// Mapping `(type, state_key) -> event`, a resolved room state at some
/// stream position (SPEC_FULL.md §3 "Room state snapshot").
pub type RoomStateSnapshot = BTreeMap<(String, String), Event>;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct TimelineBatch {
	pub prev_batch: Option<StreamToken>,
	pub events: Vec<Event>,
	pub limited: bool,
}

impl TimelineBatch {
	#[must_use]
	pub fn is_empty(&self) -> bool { self.events.is_empty() && !self.limited }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct UnreadCounts {
	pub notify_count: Option<u64>,
	pub highlight_count: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct JoinedRoom {
	pub room_id: OwnedRoomId,
	pub timeline: TimelineBatch,
	pub state_delta: Vec<Event>,
	pub ephemeral: Vec<Event>,
	pub account_data: Vec<JsonValue>,
	pub unread: UnreadCounts,
	pub synced: bool,
}

impl JoinedRoom {
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.timeline.is_empty()
			&& self.state_delta.is_empty()
			&& self.ephemeral.is_empty()
			&& self.account_data.is_empty()
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ArchivedRoom {
	pub room_id: OwnedRoomId,
	pub timeline: TimelineBatch,
	pub state_delta: Vec<Event>,
	pub account_data: Vec<JsonValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InvitedRoom {
	pub room_id: OwnedRoomId,
	pub invite_event: Event,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoomSyncError {
	pub room_id: OwnedRoomId,
	pub errcode: &'static str,
	pub message: String,
}

pub const ERRCODE_CANNOT_PEEK: &str = "CANNOT_PEEK";

/// What kind of room entry a materialization plan will eventually produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomResultType {
	Joined,
	Archived,
}

/// Internal per-room work item the room-change resolver hands to the
/// materializer (SPEC_FULL.md §3 "Room materialization plan").
#[derive(Clone, Debug)]
pub struct MaterializationPlan {
	pub room_id: OwnedRoomId,
	pub rtype: RoomResultType,
	/// Candidate timeline events already fetched by the change resolver; `None`
	/// means the materializer/timeline loader must fetch them itself.
	pub events: Option<Vec<Event>>,
	pub newly_joined: bool,
	pub full_state: bool,
	pub since_token: Option<StreamToken>,
	pub upto_token: StreamToken,
	pub always_include: bool,
	pub would_require_resync: bool,
	pub synced: bool,
}

impl MaterializationPlan {
	#[must_use]
	pub fn new(room_id: OwnedRoomId, rtype: RoomResultType, upto_token: StreamToken) -> Self {
		Self {
			room_id,
			rtype,
			events: None,
			newly_joined: false,
			full_state: false,
			since_token: None,
			upto_token,
			always_include: false,
			would_require_resync: false,
			synced: true,
		}
	}
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncResult {
	pub next_batch: BatchCursor,
	pub joined: Vec<JoinedRoom>,
	pub invited: Vec<InvitedRoom>,
	pub archived: Vec<ArchivedRoom>,
	pub errors: Vec<RoomSyncError>,
	pub presence: Vec<JsonValue>,
	pub account_data: Vec<JsonValue>,
	/// True when the lazy-loading paginator deferred rooms beyond this page.
	pub pagination_limited: bool,
}

impl SyncResult {
	/// The notifier-ignorable predicate (SPEC_FULL.md §8): long-polling keeps
	/// waiting while this is true.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.presence.is_empty()
			&& self.joined.is_empty()
			&& self.invited.is_empty()
			&& self.archived.is_empty()
			&& self.account_data.is_empty()
	}
}
