//! Otakudex Persistence - Local device storage and payload encryption

pub mod encryption;
pub mod sqlite;

pub use encryption::derive_machine_key;
pub use encryption::PayloadEncryptor;
pub use sqlite::Database;
