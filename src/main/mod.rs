mod clap;
mod panic;

use corridor_core::config::Config;
use tracing_subscriber::EnvFilter;

/// Initializes panic/backtrace capture and `tracing`, parses CLI arguments,
/// and loads configuration. The transport and storage layers that would
/// actually drive `corridor_sync::wait_for_sync` are out of scope here; this
/// binary only proves the ambient stack boots cleanly.
pub fn bootstrap() -> corridor_core::Result<Config> {
	panic::init();

	let args = clap::parse();

	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
		.init();

	Config::load(args.config)
}
