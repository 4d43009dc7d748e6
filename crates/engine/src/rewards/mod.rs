//! Loot boxes, reward names and the point ledger

mod draw;
mod ledger;
mod locks;
mod remote;
mod service;

pub use draw::*;
pub use ledger::*;
pub use locks::*;
pub use remote::*;
pub use service::*;
