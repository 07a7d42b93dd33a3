fn main() -> corridor_core::Result<()> {
	let config = corridor::bootstrap()?;

	corridor_core::info!(
		default_timeline_limit = config.default_timeline_limit,
		room_fanout_concurrency = config.room_fanout_concurrency,
		response_cache_ttl_ms = config.response_cache_ttl_ms,
		"corridor sync engine ready",
	);

	Ok(())
}
