//! Otakudex Networking - Hosted backend client and remote procedure wrappers

pub mod api;
pub mod http;

pub use http::{BackendClient, ClientConfig};
