//! Cognigy API - token acquisition for socket sessions.
//!
//! Sessions authenticate with a single bearer token. This crate resolves
//! it, either from a token supplied directly or through the one-off device
//! login call, and decodes the claims it carries.

pub mod client;
pub mod token;

// Re-export key types
pub use client::{DeviceCredentials, LoginClient};
pub use token::{TokenClaims, TokenKind, TokenSource};
