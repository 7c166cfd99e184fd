//! Client-wide constants.

/// Client version, reported nowhere on the wire but handy in logs.
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Channel name used when the caller does not set one.
pub const DEFAULT_CHANNEL: &str = "socket-client";

/// Prefix for generated user ids.
pub const USER_ID_PREFIX: &str = "user-";

/// Prefix for generated session ids.
pub const SESSION_ID_PREFIX: &str = "session-";

/// Default watchdog interval between reconnect checks, in milliseconds.
pub const DEFAULT_RECONNECT_INTERVAL_MS: u64 = 10_000;

/// Default number of reconnect attempts before giving up (0 = unlimited).
pub const DEFAULT_RECONNECT_LIMIT: u32 = 5;

/// Default transport connect timeout, in milliseconds.
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 20_000;

/// Default capacity of the client event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Value of the `source` field on outbound envelopes.
pub const INPUT_SOURCE: &str = "device";

/// Wire event names used by the backend.
pub mod events {
    /// Outbound user input (current protocol).
    pub const PROCESS_INPUT: &str = "processInput";
    /// Outbound user input (legacy protocol).
    pub const LEGACY_INPUT: &str = "input";
    /// Inbound tagged reply envelope.
    pub const OUTPUT: &str = "output";
    /// Inbound backend processing fault.
    pub const EXCEPTION: &str = "exception";
    /// Inbound typing indicator.
    pub const TYPING_STATUS: &str = "typingStatus";
    /// Inbound end-of-turn marker (dedicated-event protocol variant).
    pub const FINAL_PING: &str = "finalPing";
    /// Inbound in-band handshake request.
    pub const HANDSHAKE: &str = "handshake";
    /// Outbound request to reset the conversation state (acknowledged).
    pub const RESET_STATE: &str = "resetState";
    /// Outbound request to reset the conversation context (acknowledged).
    pub const RESET_CONTEXT: &str = "resetContext";
}

/// Query parameter names used for connection-time identity.
pub mod query {
    pub const SESSION_ID: &str = "sessionId";
    pub const URL_TOKEN: &str = "urlToken";
    pub const USER_ID: &str = "userId";
    pub const TEST_MODE: &str = "testMode";
    pub const IN_BAND_HANDSHAKE: &str = "enableInnerSocketHandshake";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        assert!(DEFAULT_RECONNECT_INTERVAL_MS > 0);
        assert!(DEFAULT_CONNECT_TIMEOUT_MS > 0);
        assert_ne!(events::OUTPUT, events::FINAL_PING);
    }
}
