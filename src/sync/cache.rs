//! Long-poll gate and in-flight-request-coalescing response cache
//! (SPEC_FULL.md §4.1).
//!
//! Grounded on `SyncHandler._wait_for_sync_for_user`'s `ResponseCache` consult
//! plus `notifier.wait_for_events` in `synapse/handlers/sync.py`, and on the
//! `Mutex<BTreeMap<Key, Arc<Mutex<Cache>>>>` connection-cache shape used
//! elsewhere in this kind of codebase for in-flight request coalescing.

use std::{collections::HashMap, sync::Arc, time::Duration};

use futures::{FutureExt, future::Shared};
use ruma::OwnedUserId;
use tokio::sync::Mutex as AsyncMutex;

use crate::{
	collaborators::{Notifier, Recompute},
	model::SyncResult,
	orchestrator::{self, Collaborators, SyncRequest},
};

type PendingFuture = Shared<futures::future::BoxFuture<'static, Result<SyncResult, SharedError>>>;

/// `corridor_core::Error` isn't `Clone` (some variants wrap non-Clone
/// third-party error types), but `futures::future::Shared` requires a
/// `Clone` output so every waiter observes the same outcome. Failures are
/// re-boxed once into this cheaply cloneable wrapper before entering the
/// cache.
#[derive(Clone, Debug)]
pub struct SharedError(pub Arc<str>);

impl From<corridor_core::Error> for SharedError {
	fn from(error: corridor_core::Error) -> Self { Self(Arc::from(error.to_string())) }
}

impl From<SharedError> for corridor_core::Error {
	fn from(error: SharedError) -> Self { corridor_core::Error::Collaborator(error.0.to_string().into()) }
}

impl std::fmt::Display for SharedError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// Fingerprint of user + filter + cursor + extras (SPEC_FULL.md §4.1). Two
/// requests with the same key join the same in-flight computation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RequestKey(pub String);

pub struct ResponseCache {
	entries: AsyncMutex<HashMap<RequestKey, PendingFuture>>,
	ttl: Duration,
}

impl ResponseCache {
	#[must_use]
	pub fn new(ttl: Duration) -> Self { Self { entries: AsyncMutex::new(HashMap::new()), ttl } }

	/// Returns the future already registered for `key`, or registers
	/// `make_future()` and returns that instead. The map lock is held for the
	/// whole check-then-insert, so two concurrent callers with the same key
	/// can never both become the "winner" that drives a fresh computation.
	/// `make_future` itself must stay unresolved (lazy) for this to actually
	/// coalesce; see `compute_and_cache`.
	pub async fn get_or_insert(self: &Arc<Self>, key: RequestKey, make_future: impl FnOnce() -> PendingFuture) -> PendingFuture {
		let mut entries = self.entries.lock().await;
		if let Some(existing) = entries.get(&key) {
			return existing.clone();
		}
		let future = make_future();
		entries.insert(key.clone(), future.clone());
		drop(entries);

		let this = Arc::clone(self);
		tokio::spawn(async move {
			tokio::time::sleep(this.ttl).await;
			this.entries.lock().await.remove(&key);
		});
		future
	}
}

/// The engine's one exposed operation (SPEC_FULL.md §6): wait up to `timeout`
/// for a non-empty sync result, coalescing concurrent identical requests
/// through the response cache.
pub async fn wait_for_sync(
	cache: &Arc<ResponseCache>,
	notifier: &dyn Notifier,
	collaborators: &Collaborators,
	request: SyncRequest,
	key: RequestKey,
	timeout: Duration,
) -> corridor_core::Result<SyncResult> {
	let immediate = timeout.is_zero() || request.cursor.is_none() || request.full_state;
	let since = request.cursor.as_ref().map(|cursor| cursor.stream_token).unwrap_or_default();
	let user = request.user.clone();
	let recompute_collaborators = collaborators.clone();
	let recompute_request = request.clone();

	let first = compute_and_cache(cache, collaborators.clone(), request, key).await?;
	if immediate || !first.is_empty() {
		return Ok(first);
	}

	match wait_via_notifier(notifier, &user, timeout, since, recompute_collaborators, recompute_request).await? {
		Some(result) => Ok(result),
		None => Ok(first),
	}
}

/// Builds a `recompute` closure that runs a fresh `build_sync_result` on
/// every notifier wakeup, not a single pre-wait snapshot: the gate is only
/// reached when the first poll was empty, so a captured result would always
/// be empty too and the long-poll could never observe a newly arrived event.
async fn wait_via_notifier(
	notifier: &dyn Notifier,
	user: &OwnedUserId,
	timeout: Duration,
	since: crate::token::StreamToken,
	collaborators: Collaborators,
	request: SyncRequest,
) -> corridor_core::Result<Option<SyncResult>> {
	let recompute: Recompute = Arc::new(move || {
		let collaborators = collaborators.clone();
		let request = request.clone();
		Box::pin(async move { orchestrator::build_sync_result(&collaborators, &request).await })
	});
	notifier.wait_for_events(user, timeout, since, recompute).await
}

/// Joins (or starts) the in-flight computation for `key`. The future handed
/// to `get_or_insert` is an `async move` block that has not been polled yet.
/// `get_or_insert` holds its map lock across the whole check-then-insert, so
/// only one caller per key ever constructs and registers it. Every caller,
/// winner included, then awaits the registered `Shared` clone, so the
/// computation itself runs exactly once per key no matter how many
/// concurrent requests share it.
async fn compute_and_cache(
	cache: &Arc<ResponseCache>,
	collaborators: Collaborators,
	request: SyncRequest,
	key: RequestKey,
) -> corridor_core::Result<SyncResult> {
	let future: PendingFuture = async move { orchestrator::build_sync_result(&collaborators, &request).await.map_err(SharedError::from) }
		.boxed()
		.shared();

	let joined = cache.get_or_insert(key, || future).await;
	joined.await.map_err(Into::into)
}

#[cfg(test)]
mod tests {
	use std::{
		collections::BTreeMap,
		sync::atomic::{AtomicUsize, Ordering},
	};

	use async_trait::async_trait;
	use ruma::{OwnedRoomId, owned_user_id};
	use serde_json::Value as JsonValue;

	use super::*;
	use crate::{
		collaborators::{EventSource, FilterCollection, PaginationConfigTags, PresenceSource, PushRuleFormatter, TagChange, VisibilityFilter},
		model::{Event, RoomStateSnapshot},
		token::StreamToken,
	};

	struct CountingNotifier(AtomicUsize);

	#[async_trait]
	impl Notifier for CountingNotifier {
		async fn wait_for_events(
			&self,
			_user: &OwnedUserId,
			_timeout: Duration,
			_from_token: crate::token::StreamToken,
			_recompute: Recompute,
		) -> corridor_core::Result<Option<SyncResult>> {
			self.0.fetch_add(1, Ordering::SeqCst);
			Ok(None)
		}
	}

	/// Actually invokes `recompute` and returns whatever it produces, instead
	/// of discarding it like `CountingNotifier` does.
	struct InvokingNotifier;

	#[async_trait]
	impl Notifier for InvokingNotifier {
		async fn wait_for_events(
			&self,
			_user: &OwnedUserId,
			_timeout: Duration,
			_from_token: crate::token::StreamToken,
			recompute: Recompute,
		) -> corridor_core::Result<Option<SyncResult>> {
			Ok(Some(recompute().await?))
		}
	}

	struct EmptyStorage {
		room_key: u64,
	}

	#[async_trait]
	impl Storage for EmptyStorage {
		async fn get_current_room_key(&self) -> corridor_core::Result<u64> { Ok(self.room_key) }
		async fn get_rooms_for_user(&self, _user: &OwnedUserId) -> corridor_core::Result<Vec<OwnedRoomId>> { Ok(vec![]) }
		async fn get_membership_changes(&self, _user: &OwnedUserId, _from: StreamToken, _to: StreamToken) -> corridor_core::Result<Vec<Event>> { Ok(vec![]) }
		async fn get_room_events_stream(&self, _rooms: &[OwnedRoomId], _from: StreamToken, _to: StreamToken, _limit: usize) -> corridor_core::Result<BTreeMap<OwnedRoomId, Vec<Event>>> { Ok(Default::default()) }
		async fn get_recent_events_for_room(&self, _room: &OwnedRoomId, _end: StreamToken, _limit: usize) -> corridor_core::Result<Vec<Event>> { Ok(vec![]) }
		async fn get_state_for_event(&self, _room: &OwnedRoomId, _at: StreamToken) -> corridor_core::Result<RoomStateSnapshot> { Ok(Default::default()) }
		async fn get_last_event_ts_for_room(&self, _room: &OwnedRoomId, _at: StreamToken) -> corridor_core::Result<Option<ruma::MilliSecondsSinceUnixEpoch>> { Ok(None) }
		async fn get_last_receipt_event_id_for_user(&self, _user: &OwnedUserId, _room: &OwnedRoomId) -> corridor_core::Result<Option<ruma::OwnedEventId>> { Ok(None) }
		async fn get_unread_notification_counts(&self, _user: &OwnedUserId, _room: &OwnedRoomId, _since_event: &ruma::OwnedEventId) -> corridor_core::Result<(u64, u64)> { Ok((0, 0)) }
		async fn get_account_data(&self, _user: &OwnedUserId, _since: Option<StreamToken>) -> corridor_core::Result<Vec<JsonValue>> { Ok(vec![]) }
		async fn get_room_account_data(&self, _user: &OwnedUserId, _room: &OwnedRoomId, _since: Option<StreamToken>) -> corridor_core::Result<Vec<JsonValue>> { Ok(vec![]) }
		async fn get_tag_changes(&self, _user: &OwnedUserId, _since: StreamToken) -> corridor_core::Result<BTreeMap<OwnedRoomId, TagChange>> { Ok(Default::default()) }
		async fn get_tags_for_user(&self, _user: &OwnedUserId, _since: Option<StreamToken>) -> corridor_core::Result<BTreeMap<OwnedRoomId, JsonValue>> { Ok(Default::default()) }
		async fn push_rules_changed(&self, _user: &OwnedUserId, _since: StreamToken) -> corridor_core::Result<bool> { Ok(false) }
		async fn current_push_rules(&self, _user: &OwnedUserId) -> corridor_core::Result<JsonValue> { Ok(serde_json::json!({})) }
		async fn ignored_users(&self, _user: &OwnedUserId) -> corridor_core::Result<Vec<OwnedUserId>> { Ok(vec![]) }
	}

	struct NoEvents;
	#[async_trait]
	impl EventSource for NoEvents {
		async fn get_current_key(&self) -> corridor_core::Result<u64> { Ok(0) }
		async fn get_new_events(&self, _user: &OwnedUserId, _from_key: u64, _limit: usize, _room_ids: &[OwnedRoomId]) -> corridor_core::Result<(Vec<Event>, u64)> { Ok((vec![], 0)) }
	}

	struct NoPresence;
	#[async_trait]
	impl PresenceSource for NoPresence {
		async fn get_states(&self, _users: &[OwnedUserId], _as_event: bool) -> corridor_core::Result<Vec<JsonValue>> { Ok(vec![]) }
		async fn get_new_presence_events(&self, _user: &OwnedUserId, _from_key: u64, _include_offline: bool) -> corridor_core::Result<(Vec<JsonValue>, u64)> { Ok((vec![], 0)) }
	}

	struct AllowAll;
	#[async_trait]
	impl VisibilityFilter for AllowAll {
		async fn filter_events_for_client(&self, _user: &OwnedUserId, events: Vec<Event>) -> corridor_core::Result<Vec<Event>> { Ok(events) }
	}

	struct IdentityPushRules;
	#[async_trait]
	impl PushRuleFormatter for IdentityPushRules {
		async fn format_push_rules_for_user(&self, _user: &OwnedUserId, rules: JsonValue) -> corridor_core::Result<JsonValue> { Ok(rules) }
	}

	struct NoopFilter;
	impl FilterCollection for NoopFilter {
		fn timeline_limit(&self) -> usize { 10 }
		fn ephemeral_limit(&self) -> usize { 10 }
	}

	fn fixture_collaborators(room_key: u64) -> Collaborators {
		Collaborators {
			storage: Arc::new(EmptyStorage { room_key }),
			typing_source: Arc::new(NoEvents),
			receipt_source: Arc::new(NoEvents),
			presence_source: Arc::new(NoPresence),
			visibility: Arc::new(AllowAll),
			push_rules: Arc::new(IdentityPushRules),
			filter: Arc::new(NoopFilter),
		}
	}

	fn fixture_request(user: OwnedUserId) -> SyncRequest {
		SyncRequest {
			user,
			cursor: None,
			full_state: false,
			peek_rooms: BTreeMap::new(),
			pagination_limit: None,
			pagination_extra_limit: 0,
			pagination_tags: PaginationConfigTags::Ignore,
			fanout_concurrency: 4,
		}
	}

	#[test]
	fn request_key_equality_is_string_equality() {
		assert_eq!(RequestKey("a".into()), RequestKey("a".into()));
		assert_ne!(RequestKey("a".into()), RequestKey("b".into()));
	}

	#[tokio::test]
	async fn notifier_is_consulted_when_timeout_is_nonzero() {
		let notifier = CountingNotifier(AtomicUsize::new(0));
		let since = crate::token::StreamToken::zero();
		let user = owned_user_id!("@alice:example.org");
		let _ = wait_via_notifier(&notifier, &user, Duration::from_millis(5), since, fixture_collaborators(0), fixture_request(user.clone())).await;
		assert_eq!(notifier.0.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn recompute_runs_a_fresh_build_not_a_stale_capture() {
		let since = crate::token::StreamToken::zero();
		let user = owned_user_id!("@alice:example.org");
		let result = wait_via_notifier(&InvokingNotifier, &user, Duration::from_millis(5), since, fixture_collaborators(42), fixture_request(user.clone()))
			.await
			.expect("wait_via_notifier succeeds")
			.expect("InvokingNotifier always returns Some");
		assert_eq!(
			result.next_batch.stream_token.room_key, 42,
			"recompute must call build_sync_result afresh, not return a captured pre-wait snapshot"
		);
	}

	#[tokio::test]
	async fn get_or_insert_returns_existing_future_for_known_key() {
		let cache = Arc::new(ResponseCache::new(Duration::from_millis(50)));
		let key = RequestKey("alice:filter1:cursor0".into());

		let first: PendingFuture = futures::future::ready(Ok(SyncResult::default())).boxed().shared();
		let returned_first = cache.get_or_insert(key.clone(), || first).await;
		assert!(returned_first.await.is_ok());

		let second: PendingFuture = futures::future::ready(Err(SharedError(Arc::from("should not run")))).boxed().shared();
		let returned_second = cache.get_or_insert(key, || second).await;
		assert!(returned_second.await.is_ok(), "second caller must observe the first future's value, not its own");
	}
}
