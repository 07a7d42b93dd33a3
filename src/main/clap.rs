//! Command-line argument parsing: a single optional config-file path, the
//! rest of the knobs come from the config file and environment instead.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(about, long_about = None)]
pub(crate) struct Args {
	/// Path to a TOML config file. Individual keys can still be overridden
	/// with `CORRIDOR_`-prefixed environment variables.
	#[arg(short, long)]
	pub(crate) config: Option<PathBuf>,
}

#[must_use]
pub(crate) fn parse() -> Args { Args::parse() }
