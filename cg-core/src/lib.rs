//! Cognigy Core - configuration, error handling and logging.
//!
//! This crate provides the shared foundation used by the other client crates:
//! - Session options with explicit defaults and a pure override merge
//! - On-disk client configuration (TOML)
//! - The `CgError` error type
//! - Structured logging with tracing
//! - Injected runtime capabilities and platform directories

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod platform;

// Re-export commonly used items at the crate root
pub use config::{
    ClientConfig, EnvelopeConfig, HandshakeMode, SessionOptions, SessionOverrides,
    TransportPreference,
};
pub use error::{CgError, CgResult};
pub use logging::init_logging;
pub use platform::RuntimeCapabilities;
