//! The sync engine (SPEC_FULL.md): computes one `/sync` response from a set
//! of external collaborators (storage, federation, presence, filters) given
//! a request fingerprint and a `since` cursor.
//!
//! `cache::wait_for_sync` is the single entry point a transport layer calls;
//! everything else in this crate is its supporting machinery.

pub mod account_data;
pub mod cache;
pub mod collaborators;
pub mod ephemeral;
pub mod materializer;
pub mod model;
pub mod orchestrator;
pub mod paginator;
pub mod presence;
pub mod rooms;
pub mod state_delta;
pub mod timeline;
pub mod token;

pub use cache::{RequestKey, ResponseCache, SharedError, wait_for_sync};
pub use collaborators::{
	EventSource, FilterCollection, Notifier, PaginationConfigOrder, PaginationConfigTags, PresenceSource, PushRuleFormatter,
	Recompute, Storage, TagChange, VisibilityFilter,
};
pub use model::{
	ArchivedRoom, Event, InvitedRoom, JoinedRoom, Membership, RoomStateSnapshot, RoomSyncError, SyncResult, TimelineBatch,
	UnreadCounts,
};
pub use orchestrator::{Collaborators, SyncRequest, build_sync_result};
pub use token::{BatchCursor, PaginationOrder, PaginationState, StreamToken};
