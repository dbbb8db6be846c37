//! Wire types, payload decoding and configuration shared by the dashboard.

pub mod config;
pub mod platform;
pub mod protocol;
pub mod sse;
