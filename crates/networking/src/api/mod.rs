//! High-level wrappers for the backend's remote procedures
//!
//! These add validation of what comes back before it enters the core.

mod catalog;
mod library;
mod rewards;

pub use catalog::*;
pub use library::*;
pub use rewards::*;
