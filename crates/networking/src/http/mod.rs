//! HTTP transport to the hosted backend

mod client;

pub use client::*;
