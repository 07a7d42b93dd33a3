//! Thin wrappers over `tracing`'s macros so call sites in the rest of the
//! workspace depend on `corridor_core::log` rather than on `tracing`
//! directly, matching the rest of the crate-wide macro surface (`err!`).

#[macro_export]
macro_rules! error {
	( $($x:tt)+ ) => { tracing::error!( $($x)+ ); }
}

#[macro_export]
macro_rules! warn {
	( $($x:tt)+ ) => { tracing::warn!( $($x)+ ); }
}

#[macro_export]
macro_rules! info {
	( $($x:tt)+ ) => { tracing::info!( $($x)+ ); }
}

#[macro_export]
macro_rules! debug {
	( $($x:tt)+ ) => { tracing::debug!( $($x)+ ); }
}

#[macro_export]
macro_rules! trace {
	( $($x:tt)+ ) => { tracing::trace!( $($x)+ ); }
}
