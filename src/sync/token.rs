//! Stream tokens and the batch cursor clients hand back on every poll.
//!
//! Grounded on the `StreamToken`/`RoomStreamToken` pair in
//! `synapse/handlers/sync.py` (via `synapse.types.StreamToken`): one
//! monotonic sub-position per logical stream, a total order per sub-stream,
//! and an opaque serialization clients must treat as unparseable.

use std::{cmp, fmt};

use serde::{Deserialize, Serialize};

/// One sub-position. Monotonic within a single server lifetime; values from
/// different server runs are not meaningfully comparable (SPEC_FULL.md §3).
pub type SubPosition = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamToken {
	pub room_key: SubPosition,
	pub presence_key: SubPosition,
	pub typing_key: SubPosition,
	pub receipt_key: SubPosition,
	pub account_data_key: SubPosition,
	pub push_rules_key: SubPosition,
}

impl StreamToken {
	#[must_use]
	pub fn zero() -> Self { Self::default() }

	/// Copy-with-one-field-replaced helpers (SPEC_FULL.md §3), one per
	/// sub-stream, mirroring the way the orchestrator advances exactly the
	/// sub-position each assembler actually consumed.
	#[must_use]
	pub fn with_room_key(mut self, key: SubPosition) -> Self {
		self.room_key = key;
		self
	}

	#[must_use]
	pub fn with_presence_key(mut self, key: SubPosition) -> Self {
		self.presence_key = key;
		self
	}

	#[must_use]
	pub fn with_typing_key(mut self, key: SubPosition) -> Self {
		self.typing_key = key;
		self
	}

	#[must_use]
	pub fn with_receipt_key(mut self, key: SubPosition) -> Self {
		self.receipt_key = key;
		self
	}

	#[must_use]
	pub fn with_account_data_key(mut self, key: SubPosition) -> Self {
		self.account_data_key = key;
		self
	}

	#[must_use]
	pub fn with_push_rules_key(mut self, key: SubPosition) -> Self {
		self.push_rules_key = key;
		self
	}

	/// True iff `self` dominates `other` on every sub-stream (invariant 3).
	#[must_use]
	pub fn dominates(&self, other: &Self) -> bool {
		self.room_key >= other.room_key
			&& self.presence_key >= other.presence_key
			&& self.typing_key >= other.typing_key
			&& self.receipt_key >= other.receipt_key
			&& self.account_data_key >= other.account_data_key
			&& self.push_rules_key >= other.push_rules_key
	}

	/// Element-wise max, used when merging a token advanced independently by
	/// several concurrent assemblers.
	#[must_use]
	pub fn merge(self, other: Self) -> Self {
		Self {
			room_key: cmp::max(self.room_key, other.room_key),
			presence_key: cmp::max(self.presence_key, other.presence_key),
			typing_key: cmp::max(self.typing_key, other.typing_key),
			receipt_key: cmp::max(self.receipt_key, other.receipt_key),
			account_data_key: cmp::max(self.account_data_key, other.account_data_key),
			push_rules_key: cmp::max(self.push_rules_key, other.push_rules_key),
		}
	}
}

impl fmt::Display for StreamToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(
			f,
			"s{}_{}_{}_{}_{}_{}",
			self.room_key,
			self.presence_key,
			self.typing_key,
			self.receipt_key,
			self.account_data_key,
			self.push_rules_key
		)
	}
}

impl std::str::FromStr for StreamToken {
	type Err = corridor_core::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let rest = s.strip_prefix('s').ok_or_else(|| corridor_core::err!("malformed stream token"))?;
		let parts: Vec<&str> = rest.split('_').collect();
		if parts.len() != 6 {
			return Err(corridor_core::err!("malformed stream token"));
		}
		let mut values = [0u64; 6];
		for (slot, part) in values.iter_mut().zip(parts) {
			*slot = part.parse().map_err(|_| corridor_core::err!("malformed stream token"))?;
		}
		Ok(Self {
			room_key: values[0],
			presence_key: values[1],
			typing_key: values[2],
			receipt_key: values[3],
			account_data_key: values[4],
			push_rules_key: values[5],
		})
	}
}

/// Order used to rank rooms when lazy-loading paginates (SPEC_FULL.md §4.7).
/// Only one variant is currently defined; kept as an enum because the
/// pagination state's wire encoding must round-trip it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaginationOrder {
	TimestampDescending,
}

/// Whether previously-tagged-but-cut rooms should be force-included on the
/// next page (SPEC_FULL.md §4.7 tag rules).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagPolicy {
	IncludeAll,
	Ignore,
}

/// Carries over the pagination progress across polls when lazy loading has
/// deferred rooms (SPEC_FULL.md §3 "Batch cursor").
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaginationState {
	pub order: PaginationOrder,
	/// Origin timestamp of the last (oldest) room included in the previous page.
	pub value: ruma::MilliSecondsSinceUnixEpoch,
	pub limit: usize,
	pub tags: TagPolicy,
}

/// Composite of a stream token plus optional in-flight pagination progress.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCursor {
	pub stream_token: StreamToken,
	pub pagination_state: Option<PaginationState>,
}

impl BatchCursor {
	#[must_use]
	pub fn initial() -> Self {
		Self { stream_token: StreamToken::zero(), pagination_state: None }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn dominates_is_reflexive() {
		let token = StreamToken { room_key: 4, ..StreamToken::zero() };
		assert!(token.dominates(&token));
	}

	#[test]
	fn with_room_key_only_touches_room_key() {
		let token = StreamToken::zero().with_room_key(7).with_presence_key(2);
		assert_eq!(token.room_key, 7);
		assert_eq!(token.presence_key, 2);
		assert_eq!(token.typing_key, 0);
	}

	#[test]
	fn merge_takes_elementwise_max() {
		let a = StreamToken::zero().with_room_key(5).with_presence_key(1);
		let b = StreamToken::zero().with_room_key(2).with_presence_key(9);
		let merged = a.merge(b);
		assert_eq!(merged.room_key, 5);
		assert_eq!(merged.presence_key, 9);
	}

	#[test]
	fn display_then_parse_roundtrips() {
		let token = StreamToken { room_key: 10, presence_key: 2, typing_key: 3, receipt_key: 4, account_data_key: 5, push_rules_key: 6 };
		let rendered = token.to_string();
		let parsed: StreamToken = rendered.parse().expect("valid token parses");
		assert_eq!(token, parsed);
	}

	#[test]
	fn parse_rejects_garbage() {
		assert!("garbage".parse::<StreamToken>().is_err());
	}
}
