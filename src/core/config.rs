use std::{path::PathBuf, time::Duration};

use figment::{
	Figment,
	providers::{Env, Format, Toml},
};
use serde::Deserialize;

use crate::Result;

/// Operator-tunable knobs the sync engine itself leaves as implementation
/// details (SPEC_FULL.md §2.1). Loaded with the usual Toml-then-env
/// layering so an operator can override any field with a
/// `CORRIDOR_`-prefixed environment variable.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
	#[serde(default = "default_timeline_limit")]
	pub default_timeline_limit: usize,

	#[serde(default = "default_ephemeral_limit")]
	pub ephemeral_limit: usize,

	#[serde(default = "default_max_long_poll_timeout_ms")]
	pub max_long_poll_timeout_ms: u64,

	#[serde(default = "default_pagination_limit")]
	pub default_pagination_limit: usize,

	/// Bounded fan-out factor for per-room concurrency (SPEC_FULL.md §5).
	#[serde(default = "default_room_fanout_concurrency")]
	pub room_fanout_concurrency: usize,

	#[serde(default = "default_response_cache_ttl_ms")]
	pub response_cache_ttl_ms: u64,
}

impl Config {
	pub fn load(path: Option<PathBuf>) -> Result<Self> {
		let figment = if let Some(path) = path {
			Figment::new()
				.merge(Toml::file(path).nested())
				.merge(Env::prefixed("CORRIDOR_").global())
		} else {
			Figment::new().merge(Env::prefixed("CORRIDOR_").global())
		};

		Ok(figment.extract()?)
	}

	#[must_use]
	pub fn max_long_poll_timeout(&self) -> Duration { Duration::from_millis(self.max_long_poll_timeout_ms) }

	#[must_use]
	pub fn response_cache_ttl(&self) -> Duration { Duration::from_millis(self.response_cache_ttl_ms) }
}

impl Default for Config {
	fn default() -> Self {
		Self {
			default_timeline_limit: default_timeline_limit(),
			ephemeral_limit: default_ephemeral_limit(),
			max_long_poll_timeout_ms: default_max_long_poll_timeout_ms(),
			default_pagination_limit: default_pagination_limit(),
			room_fanout_concurrency: default_room_fanout_concurrency(),
			response_cache_ttl_ms: default_response_cache_ttl_ms(),
		}
	}
}

fn default_timeline_limit() -> usize { 10 }
fn default_ephemeral_limit() -> usize { 100 }
fn default_max_long_poll_timeout_ms() -> u64 { 30_000 }
fn default_pagination_limit() -> usize { 10 }
fn default_room_fanout_concurrency() -> usize { 10 }
fn default_response_cache_ttl_ms() -> u64 { 5_000 }

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn defaults_are_sane() {
		let config = Config::default();
		assert_eq!(config.room_fanout_concurrency, 10);
		assert_eq!(config.max_long_poll_timeout(), Duration::from_secs(30));
	}

	#[test]
	fn loads_with_no_file() {
		let config = Config::load(None).expect("env-only figment extraction succeeds");
		assert_eq!(config.default_timeline_limit, 10);
	}
}
