//! Offline mutation replay and catalog sync progress

mod monitor;
mod policy;
mod queue;
mod replay;

pub use monitor::*;
pub use policy::*;
pub use queue::*;
pub use replay::*;
