//! Platform directories and injected runtime capabilities.
//!
//! The session layer never probes its environment itself. Whatever hosts
//! the client (a desktop shell, a bridge to an embedded browser, a server
//! process) describes what the runtime can do with a [`RuntimeCapabilities`]
//! value, which then feeds transport selection when the caller expresses no
//! preference of their own.

use std::path::PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::{CgError, CgResult};

/// Directory name used under the OS config/data roots.
const APP_DIR_NAME: &str = "CognigyClient";

/// Platform-specific locations.
pub struct Platform;

impl Platform {
    /// Get the platform-specific configuration directory.
    ///
    /// - Windows: `%APPDATA%/CognigyClient`
    /// - macOS: `~/Library/Application Support/CognigyClient`
    /// - Linux: `~/.config/CognigyClient`
    pub fn config_dir() -> CgResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| CgError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_DIR_NAME))
    }
}

/// What the hosting runtime can do, supplied at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RuntimeCapabilities {
    /// The runtime cannot use long-polling reliably and must go straight
    /// to a persistent socket.
    pub requires_streaming: bool,
}

impl RuntimeCapabilities {
    /// Capabilities of a runtime that handles every transport.
    pub fn full() -> Self {
        Self::default()
    }

    /// Derive capabilities from a browser engine name as reported by a
    /// user-agent parser (e.g. "ie", "safari", "chrome").
    ///
    /// Internet Explorer and Safari break long-polling upgrades, so they
    /// are pinned to websockets.
    pub fn for_user_agent(engine: &str) -> Self {
        let engine = engine.trim().to_ascii_lowercase();
        Self {
            requires_streaming: matches!(engine.as_str(), "ie" | "safari"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_capabilities() {
        assert!(RuntimeCapabilities::for_user_agent("ie").requires_streaming);
        assert!(RuntimeCapabilities::for_user_agent("Safari").requires_streaming);
        assert!(!RuntimeCapabilities::for_user_agent("chrome").requires_streaming);
        assert!(!RuntimeCapabilities::for_user_agent("").requires_streaming);
    }

    #[test]
    fn test_full_capabilities_do_not_force_streaming() {
        assert!(!RuntimeCapabilities::full().requires_streaming);
    }

    #[test]
    fn test_config_dir_is_namespaced() {
        if let Ok(dir) = Platform::config_dir() {
            assert!(dir.ends_with(APP_DIR_NAME));
        }
    }
}
