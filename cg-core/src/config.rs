//! Session and client configuration.
//!
//! [`SessionOptions`] is the fully populated, read-only configuration a
//! session runs with. It is produced once by [`SessionOptions::complete`],
//! which overlays caller supplied [`SessionOverrides`] onto explicit
//! defaults. That merge is a pure function and has no knowledge of the
//! network.
//!
//! [`ClientConfig`] is the on-disk shape (TOML) for hosts that keep their
//! endpoint, overrides and logging settings in a file.

use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{CgError, CgResult};
use crate::platform::{Platform, RuntimeCapabilities};

/// Which transports the session may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportPreference {
    /// Persistent socket only.
    ForceStreaming,
    /// Long-polling only.
    ForcePolling,
    /// Start with long-polling and fall back to the persistent socket.
    Auto,
}

impl std::fmt::Display for TransportPreference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ForceStreaming => write!(f, "force-streaming"),
            Self::ForcePolling => write!(f, "force-polling"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// How session identity reaches the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HandshakeMode {
    /// Identity travels as connection query parameters.
    Query,
    /// Identity is exchanged over the socket after it connects.
    InBand,
}

/// Reconnection watchdog settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectOptions {
    /// Whether the watchdog runs at all.
    pub enabled: bool,
    /// Fixed delay between watchdog checks.
    pub interval: Duration,
    /// Maximum consecutive failed reconnects (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(constants::DEFAULT_RECONNECT_INTERVAL_MS),
            max_attempts: constants::DEFAULT_RECONNECT_LIMIT,
        }
    }
}

/// Name of the field that carries the endpoint token on outbound envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TokenField {
    /// `URLToken`, used by `processInput`.
    UrlToken,
    /// `flowId`, used by older brain protocols.
    FlowId,
}

impl TokenField {
    /// The JSON key written on the wire.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::UrlToken => "URLToken",
            Self::FlowId => "flowId",
        }
    }
}

/// Which fields go into outbound input envelopes, and under which event.
///
/// The backend protocol has changed shape over time; rather than hard-code
/// one version, the envelope builder reads this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Socket event the envelope is emitted under.
    pub event_name: String,
    /// Where the endpoint token goes, if anywhere.
    pub token_field: Option<TokenField>,
    /// Include `userId`, `sessionId`, `channel` and `source`.
    pub include_identity: bool,
    /// Include `passthroughIP`.
    pub include_passthrough_ip: bool,
    /// Include `reloadFlow`, `resetFlow`, `resetState` and `resetContext`.
    pub include_policy_flags: bool,
}

impl EnvelopeConfig {
    /// Envelope for the current `processInput` protocol.
    pub fn process_input() -> Self {
        Self {
            event_name: constants::events::PROCESS_INPUT.to_string(),
            token_field: Some(TokenField::UrlToken),
            include_identity: true,
            include_passthrough_ip: true,
            include_policy_flags: true,
        }
    }

    /// Envelope for the legacy `input` protocol, which carries only the
    /// text and data of the message.
    pub fn legacy_input() -> Self {
        Self {
            event_name: constants::events::LEGACY_INPUT.to_string(),
            token_field: None,
            include_identity: false,
            include_passthrough_ip: false,
            include_policy_flags: false,
        }
    }
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self::process_input()
    }
}

/// Flags forwarded to the backend with every input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PolicyFlags {
    pub reload_flow: bool,
    pub reset_flow: bool,
    pub reset_state: bool,
    pub reset_context: bool,
}

/// Fully populated session configuration.
///
/// Built once and then only read; the session hands out `&SessionOptions`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// User id of the contact profile.
    pub user_id: String,
    /// Session id for this user.
    pub session_id: String,
    /// Identifier of the channel the client runs on.
    pub channel: String,
    /// Transport selection.
    pub transport: TransportPreference,
    /// Reconnection watchdog settings.
    pub reconnect: ReconnectOptions,
    /// Idle time after which the session reports itself expired.
    pub expires_in: Option<Duration>,
    /// How identity reaches the backend.
    pub handshake: HandshakeMode,
    /// Marks traffic as test traffic on the backend.
    pub test_mode: bool,
    /// Client IP the backend should attribute traffic to.
    pub passthrough_ip: Option<String>,
    /// Flags sent with every input.
    pub flags: PolicyFlags,
    /// Strip `<...>` markup from output text before publishing it.
    pub strip_markup: bool,
    /// Transport connect timeout.
    pub connect_timeout: Duration,
    /// Outbound envelope shape.
    pub envelope: EnvelopeConfig,
}

/// Caller supplied overrides. Every field is optional; absent fields keep
/// their default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionOverrides {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub channel: Option<String>,
    pub force_websockets: Option<bool>,
    pub force_polling: Option<bool>,
    pub reconnection: Option<bool>,
    /// Watchdog period; the watchdog ticks at least every millisecond, so
    /// 0 polls as fast as it can.
    pub reconnect_interval_ms: Option<u64>,
    pub reconnect_limit: Option<u32>,
    pub expires_in_ms: Option<u64>,
    pub enable_inner_socket_handshake: Option<bool>,
    pub test_mode: Option<bool>,
    pub passthrough_ip: Option<String>,
    pub reload_flow: Option<bool>,
    pub reset_flow: Option<bool>,
    pub reset_state: Option<bool>,
    pub reset_context: Option<bool>,
    pub strip_markup: Option<bool>,
    pub connect_timeout_ms: Option<u64>,
    pub envelope: Option<EnvelopeConfig>,
}

impl SessionOptions {
    /// Defaults with freshly generated identity.
    pub fn defaults(capabilities: &RuntimeCapabilities) -> Self {
        Self {
            user_id: random_id(constants::USER_ID_PREFIX),
            session_id: random_id(constants::SESSION_ID_PREFIX),
            channel: constants::DEFAULT_CHANNEL.to_string(),
            transport: if capabilities.requires_streaming {
                TransportPreference::ForceStreaming
            } else {
                TransportPreference::Auto
            },
            reconnect: ReconnectOptions::default(),
            expires_in: None,
            handshake: HandshakeMode::Query,
            test_mode: false,
            passthrough_ip: None,
            flags: PolicyFlags::default(),
            strip_markup: false,
            connect_timeout: Duration::from_millis(constants::DEFAULT_CONNECT_TIMEOUT_MS),
            envelope: EnvelopeConfig::default(),
        }
    }

    /// Overlay `overrides` onto the defaults.
    ///
    /// Never fails. When both force flags are set, streaming wins; when
    /// neither is given, `capabilities` decides.
    pub fn complete(overrides: SessionOverrides, capabilities: &RuntimeCapabilities) -> Self {
        let mut options = Self::defaults(capabilities);

        if let Some(user_id) = overrides.user_id {
            options.user_id = user_id;
        }
        if let Some(session_id) = overrides.session_id {
            options.session_id = session_id;
        }
        if let Some(channel) = overrides.channel {
            options.channel = channel;
        }

        if overrides.force_websockets.is_some() || overrides.force_polling.is_some() {
            options.transport = resolve_transport(
                overrides.force_websockets.unwrap_or(false),
                overrides.force_polling.unwrap_or(false),
            );
        }

        if let Some(enabled) = overrides.reconnection {
            options.reconnect.enabled = enabled;
        }
        if let Some(ms) = overrides.reconnect_interval_ms {
            options.reconnect.interval = Duration::from_millis(ms);
        }
        if let Some(limit) = overrides.reconnect_limit {
            options.reconnect.max_attempts = limit;
        }
        if let Some(ms) = overrides.expires_in_ms {
            options.expires_in = Some(Duration::from_millis(ms));
        }
        if let Some(in_band) = overrides.enable_inner_socket_handshake {
            options.handshake = if in_band {
                HandshakeMode::InBand
            } else {
                HandshakeMode::Query
            };
        }
        if let Some(test_mode) = overrides.test_mode {
            options.test_mode = test_mode;
        }
        if overrides.passthrough_ip.is_some() {
            options.passthrough_ip = overrides.passthrough_ip;
        }
        if let Some(v) = overrides.reload_flow {
            options.flags.reload_flow = v;
        }
        if let Some(v) = overrides.reset_flow {
            options.flags.reset_flow = v;
        }
        if let Some(v) = overrides.reset_state {
            options.flags.reset_state = v;
        }
        if let Some(v) = overrides.reset_context {
            options.flags.reset_context = v;
        }
        if let Some(strip) = overrides.strip_markup {
            options.strip_markup = strip;
        }
        if let Some(ms) = overrides.connect_timeout_ms {
            options.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(envelope) = overrides.envelope {
            options.envelope = envelope;
        }

        options
    }

    /// Whether identity is exchanged in-band after connecting.
    pub fn uses_in_band_handshake(&self) -> bool {
        self.handshake == HandshakeMode::InBand
    }
}

/// Streaming beats polling when both are forced.
fn resolve_transport(force_streaming: bool, force_polling: bool) -> TransportPreference {
    match (force_streaming, force_polling) {
        (true, _) => TransportPreference::ForceStreaming,
        (false, true) => TransportPreference::ForcePolling,
        (false, false) => TransportPreference::Auto,
    }
}

/// Collision-resistant opaque id with a readable prefix.
fn random_id(prefix: &str) -> String {
    format!("{prefix}{}", uuid::Uuid::new_v4())
}

/// On-disk client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Backend endpoint and credentials.
    #[serde(default)]
    pub endpoint: EndpointConfig,

    /// Session overrides applied on top of the defaults.
    #[serde(default)]
    pub session: SessionOverrides,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the backend lives and how to authenticate against it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Socket endpoint URL (e.g. "https://endpoint.example.com/abc").
    #[serde(default)]
    pub url: String,

    /// Endpoint URL token. When set, no login call is made.
    #[serde(default)]
    pub url_token: String,

    /// Base URL of the login API, used only when `url_token` is empty.
    #[serde(default)]
    pub base_url: String,

    /// Login user.
    #[serde(default)]
    pub user: String,

    /// Login API key.
    #[serde(default)]
    pub api_key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for log files. Empty means console only.
    #[serde(default)]
    pub directory: String,

    /// Enable JSON structured logging output.
    #[serde(default)]
    pub json_output: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: String::new(),
            json_output: false,
        }
    }
}

impl ClientConfig {
    /// Load configuration from the default config file path, falling back
    /// to defaults when no file exists.
    pub fn load_default() -> CgResult<Self> {
        let path = Self::default_config_path()?;
        if path.exists() {
            Self::load_from_file(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> CgResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a specific file path.
    pub fn save_to_file(&self, path: &Path) -> CgResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| CgError::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> CgResult<PathBuf> {
        Ok(Platform::config_dir()?.join("config.toml"))
    }

    /// Build session options from the stored overrides.
    pub fn session_options(&self, capabilities: &RuntimeCapabilities) -> SessionOptions {
        SessionOptions::complete(self.session.clone(), capabilities)
    }

    /// Whether enough is configured to open a session without a login call.
    pub fn has_direct_token(&self) -> bool {
        !self.endpoint.url.is_empty() && !self.endpoint.url_token.is_empty()
    }

    /// Sanitize and normalize an endpoint address.
    ///
    /// Ensures the address has a scheme and strips trailing slashes.
    /// Bare hosts default to https.
    pub fn sanitize_endpoint(address: &str) -> String {
        let trimmed = address.trim().trim_matches('"').trim();
        if trimmed.is_empty() {
            return String::new();
        }

        let with_scheme = if trimmed.contains("://") {
            trimmed.to_string()
        } else if trimmed.starts_with("localhost") || trimmed.starts_with("127.0.0.1") {
            format!("http://{trimmed}")
        } else {
            format!("https://{trimmed}")
        };

        with_scheme.trim_end_matches('/').to_string()
    }
}
