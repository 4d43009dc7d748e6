//! Data models for Otakudex entities

mod media;
mod offline;
mod reward;
mod user;

pub use media::*;
pub use offline::*;
pub use reward::*;
pub use user::*;
