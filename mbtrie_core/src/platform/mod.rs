//! Platform-specific raw allocation for mbtrie

#[cfg(unix)]
pub mod unix;
#[cfg(not(unix))]
pub mod portable;

#[cfg(unix)]
pub use unix::{raw_alloc, raw_free};
#[cfg(not(unix))]
pub use portable::{raw_alloc, raw_free};
