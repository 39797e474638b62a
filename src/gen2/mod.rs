//! Gen2 REST transport: auth-aware HTTP client, request/response types,
//! and simulation-mode interception.

pub mod client;
pub mod types;

pub use client::{Gen2Client, Gen2ClientOptions};
