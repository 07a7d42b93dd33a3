mod err;

use std::{borrow::Cow, convert::Infallible, fmt};

pub use err::*;

/// Crate-wide result alias; defaults the error type since almost every
/// fallible operation in the sync engine produces an [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error)]
pub enum Error {
	#[error("{0}")]
	Io(#[from] std::io::Error),
	#[error("{0}")]
	Json(#[from] serde_json::Error),
	#[error("Join error: {0}")]
	Join(#[from] tokio::task::JoinError),
	#[error("{0}")]
	Figment(#[from] figment::Error),
	#[error("{0}")]
	Ruma(#[from] ruma::IdParseError),

	/// Client-supplied pagination config failed validation (§7 category 1).
	/// Never embedded in a sync result; the transport maps this straight to
	/// an HTTP 400.
	#[error("invalid pagination config: {0}")]
	Pagination(Cow<'static, str>),

	/// A collaborator (storage, event source, presence, …) failed. Poisons
	/// the response-cache entry for every waiter on this request.
	#[error("{0}")]
	Collaborator(Cow<'static, str>),

	#[error("arithmetic operation failed: {0}")]
	Arithmetic(&'static str),

	#[error("{0}")]
	Err(Cow<'static, str>),
}

impl fmt::Debug for Error {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{self}") }
}

#[allow(clippy::fallible_impl_from)]
impl From<Infallible> for Error {
	#[cold]
	fn from(_e: Infallible) -> Self { unreachable!("infallible error should never exist") }
}
