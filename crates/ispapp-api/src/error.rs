use thiserror::Error;

/// Top-level error type for the `ispapp-api` crate.
///
/// Covers the auth exchange, the session transport and the wire protocol.
/// The session loop uses [`is_auth_rejected`](Error::is_auth_rejected) and
/// [`is_transient`](Error::is_transient) to pick its recovery path; none of
/// these errors is fatal to the process.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The control plane rejected the login or refresh exchange.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// The WebSocket upgrade was refused with 401/403 (stale access token).
    #[error("Session handshake rejected (HTTP {status})")]
    HandshakeRejected { status: u16 },

    /// Stored credentials are unusable (missing identity, unreadable store).
    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TCP connect to the control plane failed.
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Request or handshake timed out.
    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Non-success HTTP status from the control plane.
    #[error("Control plane error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket handshake or frame I/O failed.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Server closed the session.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Nothing was read within the read deadline.
    #[error("No frame received within {deadline_secs}s")]
    HeartbeatTimeout { deadline_secs: u64 },

    // ── Data ────────────────────────────────────────────────────────
    /// Inbound frame was not a valid envelope.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Lifecycle ───────────────────────────────────────────────────
    /// The outbound queue is closed because the session shut down.
    #[error("Session outbox is closed")]
    QueueClosed,

    /// A non-blocking send found the outbound queue full.
    #[error("Session outbox is full")]
    QueueFull,

    /// `run()` called while the session is already running or after it
    /// shut down.
    #[error("Session is already running or has shut down")]
    SessionUnavailable,
}

impl Error {
    /// Returns `true` if the control plane refused our credentials and a
    /// fresh login might resolve it.
    pub fn is_auth_rejected(&self) -> bool {
        matches!(
            self,
            Self::Authentication { .. } | Self::HandshakeRejected { .. }
        )
    }

    /// Returns `true` if this is a network-level failure worth retrying
    /// as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Connect { .. }
            | Self::Timeout { .. }
            | Self::WebSocket(_)
            | Self::WebSocketClosed { .. }
            | Self::HeartbeatTimeout { .. } => true,
            _ => false,
        }
    }
}
