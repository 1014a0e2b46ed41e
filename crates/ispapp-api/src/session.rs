//! Reconnecting, authenticated session to the ISPApp control plane.
//!
//! One [`SessionClient`] owns one logical duplex connection. Its run loop
//! walks the state machine
//!
//! ```text
//! Disconnected → Connecting → Authenticating → Connected
//!                    ↑              │               │
//!                    └── ReconnectWait ◄────────────┘
//! ```
//!
//! retrying forever with capped exponential backoff. Credentials come from
//! a [`CredentialSource`]; inbound envelopes go to a [`Dispatcher`]; replies
//! travel back through the bounded [`Outbox`].
//!
//! # Example
//!
//! ```rust,ignore
//! use ispapp_api::session::{SessionClient, SessionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let session = SessionClient::new(SessionConfig::default(), source, dispatcher)?;
//! let cancel = CancellationToken::new();
//! let task = tokio::spawn({
//!     let session = session.clone();
//!     let cancel = cancel.clone();
//!     async move { session.run(cancel).await }
//! });
//!
//! let mut state = session.subscribe_state();
//! state.wait_for(|s| *s == SessionState::Connected).await?;
//!
//! cancel.cancel();
//! task.await??;
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{self, ClientRequestBuilder, Message};
use tokio_tungstenite::{Connector, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::control::{ControlPlaneClient, TokenPair};
use crate::error::Error;
use crate::outbox::Outbox;
use crate::protocol::{Envelope, PING};
use crate::transport::TransportConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ── Collaborators ───────────────────────────────────────────────────

/// Device credentials as the session sees them.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub login: String,
    pub key: SecretString,
    pub access_token: SecretString,
    pub refresh_token: SecretString,
}

impl Credentials {
    fn with_tokens(&self, tokens: &TokenPair) -> Self {
        Self {
            login: self.login.clone(),
            key: self.key.clone(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
        }
    }
}

/// Where the control plane lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

/// Read access to persisted identity plus a write path for issued tokens.
///
/// Called on every connection attempt so edits made while the session is
/// up (new domain, rotated key) take effect on the next reconnect.
pub trait CredentialSource: Send + Sync {
    fn endpoint(&self) -> Result<Endpoint, Error>;

    fn credentials(&self) -> Result<Credentials, Error>;

    fn store_tokens(&self, tokens: &TokenPair) -> Result<(), Error>;

    /// Notified when the session enters or leaves `Connected`.
    fn connection_changed(&self, _connected: bool) {}
}

/// Receives every inbound envelope except the `ping`s the session answers
/// itself. Must not block: slow work belongs on its own task.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, envelope: Envelope, outbox: &Outbox);
}

// ── SessionState ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    ReconnectWait { attempt: u32, delay: Duration },
}

// ── Configuration ───────────────────────────────────────────────────

/// Capped exponential backoff between connection attempts.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first failure. Default: 5s.
    pub initial_delay: Duration,

    /// Growth factor per consecutive failure. Default: 1.5.
    pub multiplier: f64,

    /// Upper bound on any single delay. Default: 300s.
    pub max_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 1.5,
            max_delay: Duration::from_secs(300),
        }
    }
}

impl ReconnectConfig {
    /// `min(initial * multiplier^attempt, max)`.
    ///
    /// No jitter, so the sequence is non-decreasing in `attempt`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = if self.multiplier.is_finite() {
            self.multiplier.max(1.0)
        } else {
            1.0
        };
        let base = self.initial_delay.as_secs_f64() * factor.powi(exponent);
        let capped = base.min(self.max_delay.as_secs_f64()).max(0.0);
        Duration::from_secs_f64(capped)
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Ping after this long without writing anything. Default: 30s.
    pub interval: Duration,
    /// Fail the connection after this long without reading anything.
    /// Default: 60s.
    pub read_deadline: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            read_deadline: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// `wss`/`https` when true, `ws`/`http` otherwise.
    pub use_tls: bool,
    pub ws_path: String,
    /// Auth endpoint override. Defaults to the session host and port.
    pub api_url: Option<Url>,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
    pub transport: TransportConfig,
    pub outbox_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            use_tls: true,
            ws_path: "/agent/ws".into(),
            api_url: None,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            transport: TransportConfig::default(),
            outbox_capacity: 256,
        }
    }
}

impl SessionConfig {
    pub fn ws_url(&self, endpoint: &Endpoint) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let path = if self.ws_path.starts_with('/') {
            self.ws_path.clone()
        } else {
            format!("/{}", self.ws_path)
        };
        format!("{scheme}://{}:{}{path}", endpoint.host, endpoint.port)
    }

    pub fn api_base(&self, endpoint: &Endpoint) -> String {
        if let Some(url) = &self.api_url {
            return url.to_string();
        }
        let scheme = if self.use_tls { "https" } else { "http" };
        format!("{scheme}://{}:{}/", endpoint.host, endpoint.port)
    }
}

// ── SessionClient ───────────────────────────────────────────────────

/// Handle to the session. Cheaply cloneable via `Arc<SessionInner>`.
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    config: SessionConfig,
    source: Arc<dyn CredentialSource>,
    dispatcher: Arc<dyn Dispatcher>,
    http: reqwest::Client,
    connector: Option<Connector>,
    state: watch::Sender<SessionState>,
    /// Tokens from the latest successful authentication.
    credentials: ArcSwapOption<Credentials>,
    outbox: Outbox,
    outbox_rx: Mutex<Option<mpsc::Receiver<String>>>,
    /// Cancellation handle of the live connection, swapped per attempt.
    link: std::sync::Mutex<Option<CancellationToken>>,
    /// Cancellation handle of the active `run()`.
    running: std::sync::Mutex<Option<CancellationToken>>,
    /// Skip the refresh exchange on the next attempt.
    force_login: AtomicBool,
    /// Set once `run()` has claimed the outbox receiver.
    claimed: AtomicBool,
}

impl SessionClient {
    pub fn new(
        config: SessionConfig,
        source: Arc<dyn CredentialSource>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, Error> {
        let http = config.transport.build_client()?;
        let connector = config.transport.ws_connector()?;
        let (outbox, outbox_rx) = Outbox::channel(config.outbox_capacity);
        let (state, _) = watch::channel(SessionState::Disconnected);

        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                source,
                dispatcher,
                http,
                connector,
                state,
                credentials: ArcSwapOption::empty(),
                outbox,
                outbox_rx: Mutex::new(Some(outbox_rx)),
                link: std::sync::Mutex::new(None),
                running: std::sync::Mutex::new(None),
                force_login: AtomicBool::new(false),
                claimed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Sending half of the outbound queue.
    pub fn outbox(&self) -> Outbox {
        self.inner.outbox.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Subscribe to state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Credentials as of the last successful authentication.
    pub fn credentials(&self) -> Option<Arc<Credentials>> {
        self.inner.credentials.load_full()
    }

    /// Drop the live connection; the run loop reconnects after backoff.
    pub fn reconnect(&self) {
        let link = self.inner.link.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = link.as_ref() {
            info!("reconnect requested");
            token.cancel();
        }
    }

    /// Whether `run()` has already been called. A session cannot run twice.
    pub fn has_run(&self) -> bool {
        self.inner.claimed.load(Ordering::Acquire)
    }

    /// Stop the active `run()`. Equivalent to cancelling its token.
    pub fn stop(&self) {
        let running = self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = running.as_ref() {
            token.cancel();
        }
    }

    // ── Run loop ─────────────────────────────────────────────────────

    /// Drive the session until `cancel` fires. Connection and auth failures
    /// never end the loop. On return the outbox is closed and the state is
    /// `Disconnected`.
    ///
    /// A session runs once; a second call returns
    /// [`Error::SessionUnavailable`].
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), Error> {
        self.inner.claimed.store(true, Ordering::Release);
        let mut rx = self
            .inner
            .outbox_rx
            .lock()
            .await
            .take()
            .ok_or(Error::SessionUnavailable)?;
        *self
            .inner
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(cancel.clone());

        self.run_loop(&mut rx, &cancel).await;

        self.inner.outbox.close();
        self.set_state(SessionState::Disconnected);
        debug!("session loop exited");
        Ok(())
    }

    async fn run_loop(&self, rx: &mut mpsc::Receiver<String>, cancel: &CancellationToken) {
        let mut attempt: u32 = 0;

        loop {
            let link = self.replace_link(cancel);

            let established = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok(ws) => {
                    attempt = 0;
                    self.set_state(SessionState::Connected);
                    self.inner.source.connection_changed(true);

                    let served = self.serve(ws, rx, &link).await;

                    self.inner.source.connection_changed(false);
                    if cancel.is_cancelled() {
                        break;
                    }
                    match served {
                        Ok(()) => info!("session closed, reconnecting"),
                        Err(e) if e.is_transient() => info!(error = %e, "session lost"),
                        Err(e) => warn!(error = %e, "session lost"),
                    }
                }
                Err(e) => {
                    if e.is_auth_rejected() {
                        self.inner.force_login.store(true, Ordering::Release);
                    }
                    warn!(error = %e, attempt, "session attempt failed");
                }
            }

            let delay = self.inner.config.reconnect.delay(attempt);
            self.set_state(SessionState::ReconnectWait { attempt, delay });

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            attempt = attempt.saturating_add(1);
        }
    }

    fn replace_link(&self, cancel: &CancellationToken) -> CancellationToken {
        let token = cancel.child_token();
        let mut link = self.inner.link.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(old) = link.replace(token.clone()) {
            old.cancel();
        }
        token
    }

    fn set_state(&self, next: SessionState) {
        let prev = self.inner.state.send_replace(next.clone());
        if prev == next {
            return;
        }
        if let SessionState::ReconnectWait { attempt, delay } = &next {
            info!(
                from = %prev,
                to = %next,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "session state"
            );
        } else {
            info!(from = %prev, to = %next, "session state");
        }
    }

    // ── Connection establishment ─────────────────────────────────────

    /// Connecting (credentials + TCP) then Authenticating (token exchange +
    /// upgrade carrying the bearer token).
    async fn establish(&self) -> Result<WsStream, Error> {
        let inner = &self.inner;
        self.set_state(SessionState::Connecting);

        let endpoint = inner.source.endpoint()?;
        let creds = inner.source.credentials()?;
        if creds.login.trim().is_empty() {
            return Err(Error::Credentials("device login is empty".into()));
        }

        let connect_timeout = inner.config.transport.connect_timeout;
        let addr = format!("{}:{}", endpoint.host, endpoint.port);
        debug!(%addr, "connecting");
        let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(addr.as_str()))
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: connect_timeout.as_secs(),
            })?
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(error = %e, "TCP_NODELAY not applied");
        }

        self.set_state(SessionState::Authenticating);
        let control =
            ControlPlaneClient::from_reqwest(&inner.config.api_base(&endpoint), inner.http.clone())?;
        let tokens = self.authenticate(&control, &creds).await?;

        let url = inner.config.ws_url(&endpoint);
        let uri: tungstenite::http::Uri = url
            .parse()
            .map_err(|e: tungstenite::http::uri::InvalidUri| Error::WebSocket(e.to_string()))?;
        let request = ClientRequestBuilder::new(uri)
            .with_header(
                "Authorization",
                format!("Bearer {}", tokens.access_token.expose_secret()),
            )
            .with_header("X-Device-ID", creds.login.clone());

        let (ws, _response) = tokio::time::timeout(
            connect_timeout,
            tokio_tungstenite::client_async_tls_with_config(
                request,
                tcp,
                None,
                inner.connector.clone(),
            ),
        )
        .await
        .map_err(|_| Error::Timeout {
            timeout_secs: connect_timeout.as_secs(),
        })?
        .map_err(handshake_error)?;

        info!(%url, login = %creds.login, "session established");
        Ok(ws)
    }

    /// Refresh first, full login as fallback. Issued tokens are persisted
    /// and cached before the upgrade.
    async fn authenticate(
        &self,
        control: &ControlPlaneClient,
        creds: &Credentials,
    ) -> Result<TokenPair, Error> {
        let force_login = self.inner.force_login.swap(false, Ordering::AcqRel);
        let try_refresh = !force_login && !creds.refresh_token.expose_secret().is_empty();

        let tokens = if try_refresh {
            match control.refresh(&creds.refresh_token).await {
                Ok(tokens) => {
                    debug!("token refresh accepted");
                    tokens
                }
                Err(e) if e.is_auth_rejected() => {
                    info!(error = %e, "token refresh rejected, falling back to login");
                    control.login(&creds.login, &creds.key).await?
                }
                Err(e) => return Err(e),
            }
        } else {
            control.login(&creds.login, &creds.key).await?
        };

        if let Err(e) = self.inner.source.store_tokens(&tokens) {
            warn!(error = %e, "failed to persist issued tokens");
        }
        self.inner
            .credentials
            .store(Some(Arc::new(creds.with_tokens(&tokens))));
        Ok(tokens)
    }

    // ── Connected ────────────────────────────────────────────────────

    /// Run reader and writer until either fails or the link is cancelled.
    async fn serve(
        &self,
        ws: WsStream,
        rx: &mut mpsc::Receiver<String>,
        link: &CancellationToken,
    ) -> Result<(), Error> {
        let (mut sink, mut stream) = ws.split();

        let result = tokio::select! {
            biased;
            () = link.cancelled() => Ok(()),
            r = self.read_loop(&mut stream) => r,
            r = write_loop(&mut sink, rx, self.inner.config.heartbeat.interval) => r,
        };

        if link.is_cancelled() {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await;
        }
        link.cancel();
        result
    }

    async fn read_loop<S>(&self, stream: &mut S) -> Result<(), Error>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
    {
        let deadline = self.inner.config.heartbeat.read_deadline;

        loop {
            let Ok(frame) = tokio::time::timeout(deadline, stream.next()).await else {
                return Err(Error::HeartbeatTimeout {
                    deadline_secs: deadline.as_secs(),
                });
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()).await?,
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => self.handle_text(text).await?,
                    Err(_) => warn!(len = bytes.len(), "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => trace!("heartbeat frame"),
                Some(Ok(Message::Close(frame))) => {
                    let Some(cf) = frame else {
                        info!("close frame received (no payload)");
                        return Ok(());
                    };
                    info!(code = %cf.code, reason = %cf.reason, "close frame received");
                    if cf.code == CloseCode::Normal {
                        return Ok(());
                    }
                    return Err(Error::WebSocketClosed {
                        code: cf.code.into(),
                        reason: cf.reason.to_string(),
                    });
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
                None => {
                    info!("session stream ended");
                    return Ok(());
                }
            }
        }
    }

    /// Answer pings inline, dispatch everything else, drop garbage.
    async fn handle_text(&self, text: &str) -> Result<(), Error> {
        let envelope = match Envelope::parse(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, len = text.len(), "dropping malformed envelope");
                return Ok(());
            }
        };

        if envelope.kind == PING {
            trace!(uuid = ?envelope.correlation_id, "answering ping");
            return self.inner.outbox.send(&envelope.pong_for()).await;
        }

        debug!(kind = %envelope.kind, uuid = ?envelope.correlation_id, "inbound message");
        self.inner.dispatcher.dispatch(envelope, &self.inner.outbox);
        Ok(())
    }
}

/// Drain the outbox in order; ping when nothing was written for `interval`.
async fn write_loop<S>(
    sink: &mut S,
    rx: &mut mpsc::Receiver<String>,
    interval: Duration,
) -> Result<(), Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let mut idle = tokio::time::interval_at(Instant::now() + interval, interval);
    idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            queued = rx.recv() => {
                let Some(text) = queued else {
                    return Err(Error::QueueClosed);
                };
                sink.send(Message::text(text))
                    .await
                    .map_err(|e| Error::WebSocket(e.to_string()))?;
                idle.reset();
            }
            _ = idle.tick() => {
                trace!("idle, sending ping");
                sink.send(Message::Ping(Vec::new().into()))
                    .await
                    .map_err(|e| Error::WebSocket(e.to_string()))?;
            }
        }
    }
}

fn handshake_error(err: tungstenite::Error) -> Error {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                Error::HandshakeRejected { status }
            } else {
                Error::WebSocket(format!("upgrade rejected with HTTP {status}"))
            }
        }
        other => Error::WebSocket(other.to_string()),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_reconnect_config() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(5));
        assert_eq!(config.max_delay, Duration::from_secs(300));
        assert!((config.multiplier - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn backoff_grows_by_multiplier() {
        let config = ReconnectConfig::default();
        assert_eq!(config.delay(0), Duration::from_secs(5));
        assert_eq!(config.delay(1), Duration::from_millis(7_500));
        assert_eq!(config.delay(2), Duration::from_millis(11_250));
    }

    #[test]
    fn backoff_is_monotonic_and_capped() {
        let config = ReconnectConfig::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let d = config.delay(attempt);
            assert!(d >= prev, "delay({attempt}) = {d:?} fell below {prev:?}");
            assert!(d <= config.max_delay);
            prev = d;
        }
        assert_eq!(config.delay(u32::MAX), config.max_delay);
    }

    #[test]
    fn backoff_tolerates_bad_multiplier() {
        let config = ReconnectConfig {
            multiplier: f64::NAN,
            ..ReconnectConfig::default()
        };
        assert_eq!(config.delay(10), config.initial_delay);
    }

    #[test]
    fn urls_follow_tls_mode() {
        let ep = Endpoint {
            host: "prv.cloud.ispapp.co".into(),
            port: 443,
        };
        let mut config = SessionConfig::default();
        assert_eq!(config.ws_url(&ep), "wss://prv.cloud.ispapp.co:443/agent/ws");
        assert_eq!(config.api_base(&ep), "https://prv.cloud.ispapp.co:443/");

        config.use_tls = false;
        config.ws_path = "socket".into();
        assert_eq!(config.ws_url(&ep), "ws://prv.cloud.ispapp.co:443/socket");
    }

    // ── Reader and lifecycle ────────────────────────────────────────

    struct NoSource;

    impl CredentialSource for NoSource {
        fn endpoint(&self) -> Result<Endpoint, Error> {
            Err(Error::Credentials("none".into()))
        }

        fn credentials(&self) -> Result<Credentials, Error> {
            Err(Error::Credentials("none".into()))
        }

        fn store_tokens(&self, _tokens: &TokenPair) -> Result<(), Error> {
            Ok(())
        }
    }

    struct Ignore;

    impl Dispatcher for Ignore {
        fn dispatch(&self, _envelope: Envelope, _outbox: &Outbox) {}
    }

    fn client() -> SessionClient {
        SessionClient::new(SessionConfig::default(), Arc::new(NoSource), Arc::new(Ignore)).unwrap()
    }

    fn close(code: CloseCode) -> Result<Message, tungstenite::Error> {
        Ok(Message::Close(Some(tungstenite::protocol::CloseFrame {
            code,
            reason: "bye".into(),
        })))
    }

    #[tokio::test]
    async fn abnormal_close_is_an_error() {
        let session = client();
        let mut frames = futures_util::stream::iter(vec![close(CloseCode::Away)]);
        match session.read_loop(&mut frames).await {
            Err(Error::WebSocketClosed { code, reason }) => {
                assert_eq!(code, 1001);
                assert_eq!(reason, "bye");
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let mut frames = futures_util::stream::iter(vec![close(CloseCode::Normal)]);
        assert!(session.read_loop(&mut frames).await.is_ok());
    }

    #[tokio::test]
    async fn session_runs_only_once() {
        let session = client();
        assert!(!session.has_run());

        let cancel = CancellationToken::new();
        cancel.cancel();
        session.run(cancel.clone()).await.unwrap();
        assert!(session.has_run());
        assert!(session.outbox().is_closed());
        assert!(matches!(
            session.run(cancel).await,
            Err(Error::SessionUnavailable)
        ));
    }
}
