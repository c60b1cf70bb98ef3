//! Core server: accepts inbound connections and spawns one session relay
//! per connection.
//!
//! Sessions are fully isolated: each runs in its own task, owns its own
//! state, and shares nothing with other sessions beyond the read-only
//! credential inside the config. A panic or failure in one session never
//! reaches the listener or its siblings.

use crate::config::ServerConfig;
use crate::relay::{LogHook, SessionHook, SessionRelay, SessionSummary};
use crate::transport::websocket::{self, ClientConnection};
use parley_core::{CloseStatus, RelayResult};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// The parley relay server instance.
pub struct RelayServer {
    /// Server configuration, including the read-only credential.
    config: Arc<ServerConfig>,
    /// Downstream call invoked after each session closes.
    hook: Arc<dyn SessionHook>,
    /// Gauge of currently running sessions.
    active_sessions: Arc<AtomicUsize>,
}

impl RelayServer {
    /// Create a new server instance with the default (logging) session hook.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_hook(config, Arc::new(LogHook))
    }

    /// Create a server with a custom session hook.
    pub fn with_hook(config: ServerConfig, hook: Arc<dyn SessionHook>) -> Self {
        Self {
            config: Arc::new(config),
            hook,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of currently running sessions.
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::SeqCst)
    }

    /// Bind the listener and serve until the process is stopped.
    pub async fn run(self: Arc<Self>) -> RelayResult<()> {
        let (addr, conns) = websocket::start_listener(self.config.listen_addr()?).await?;
        info!(addr = %addr, upstream = %self.config.upstream.endpoint, "relay listening");
        self.accept_loop(conns).await;
        Ok(())
    }

    /// Bind the listener, serve in a background task, and return the bound
    /// address. Used when the caller owns the blocking (tests, embedding).
    pub async fn spawn(self: Arc<Self>) -> RelayResult<SocketAddr> {
        let (addr, conns) = websocket::start_listener(self.config.listen_addr()?).await?;
        info!(addr = %addr, upstream = %self.config.upstream.endpoint, "relay listening");
        tokio::spawn(async move { self.accept_loop(conns).await });
        Ok(addr)
    }

    async fn accept_loop(self: Arc<Self>, mut conns: mpsc::Receiver<ClientConnection>) {
        while let Some(conn) = conns.recv().await {
            self.clone().handle_connection(conn);
        }
    }

    /// Start exactly one session relay for an accepted connection.
    ///
    /// With no credential configured the connection is refused on the spot
    /// with the configuration-error status; the upstream connector is never
    /// invoked for it.
    fn handle_connection(self: Arc<Self>, mut conn: ClientConnection) {
        let session_id = generate_session_id();
        let server = self.clone();
        let active = self.active_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            session_id = %session_id,
            remote = %conn.remote_addr,
            active,
            "session accepted"
        );

        let credential = match &self.config.credential {
            Some(cred) => cred.clone(),
            None => {
                warn!(session_id = %session_id, "refusing session: no credential configured");
                tokio::spawn(async move {
                    let started = Instant::now();
                    let status = CloseStatus::ConfigError;
                    crate::relay::session::send_close(&mut conn.ws_stream, &status).await;
                    server.session_closed(SessionSummary {
                        session_id,
                        status,
                        frames_to_upstream: 0,
                        frames_to_client: 0,
                        duration: started.elapsed(),
                    });
                });
                return;
            }
        };

        let relay = SessionRelay::new(
            session_id,
            self.config.upstream.clone(),
            credential,
        );
        tokio::spawn(async move {
            let summary = relay.run(conn.ws_stream).await;
            server.session_closed(summary);
        });
    }

    fn session_closed(&self, summary: SessionSummary) {
        let active = self.active_sessions.fetch_sub(1, Ordering::SeqCst) - 1;
        tracing::debug!(session_id = %summary.session_id, active, "session released");
        self.hook.on_session_closed(&summary);
    }
}

/// Generate a random session ID (hex-encoded, 16 bytes = 32 hex chars).
fn generate_session_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthScheme, UpstreamConfig};
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{accept_async, connect_async};

    const WAIT: Duration = Duration::from_secs(5);

    fn test_config(upstream: &str, credential: Option<&str>) -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1".to_string(),
            port: 0,
            upstream: UpstreamConfig {
                endpoint: upstream.to_string(),
                auth_scheme: AuthScheme::Query,
                auth_param: "key".to_string(),
                dial_timeout: Duration::from_secs(2),
            },
            credential: credential.map(Arc::from),
        }
    }

    async fn spawn_server(upstream: &str, credential: Option<&str>) -> SocketAddr {
        let server = Arc::new(RelayServer::new(test_config(upstream, credential)));
        server.spawn().await.unwrap()
    }

    /// Hook that captures summaries on a channel.
    struct CaptureHook(mpsc::UnboundedSender<SessionSummary>);

    impl SessionHook for CaptureHook {
        fn on_session_closed(&self, summary: &SessionSummary) {
            let _ = self.0.send(summary.clone());
        }
    }

    /// Fake upstream that delays its WebSocket handshake, then records every
    /// data frame it receives.
    async fn recording_upstream(
        handshake_delay: Duration,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<Message>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(handshake_delay).await;
            let mut ws = accept_async(stream).await.unwrap();
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(_) | Message::Binary(_) => {
                        let _ = tx.send(msg);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        });
        (addr, rx)
    }

    /// Fake upstream that echoes every data frame back, one task per
    /// connection.
    async fn echo_upstream() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    while let Some(Ok(msg)) = ws.next().await {
                        match msg {
                            Message::Text(_) | Message::Binary(_) => {
                                if ws.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                });
            }
        });
        addr
    }

    async fn expect_text(
        ws: &mut (impl StreamExt<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin),
    ) -> String {
        loop {
            match timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(Message::Text(s))) => return s,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    async fn expect_close_code(
        ws: &mut (impl StreamExt<Item = tokio_tungstenite::tungstenite::Result<Message>> + Unpin),
    ) -> Option<u16> {
        loop {
            match timeout(WAIT, ws.next()).await.unwrap() {
                Some(Ok(Message::Close(frame))) => {
                    return frame.map(|f| u16::from(f.code));
                }
                Some(Ok(_)) => {}
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    }

    // P1/P2 + scenario 1: frames sent while the upstream is still dialing
    // arrive in order, after the handshake, with later frames following.
    #[tokio::test]
    async fn buffered_frames_arrive_in_order_after_dial() {
        let (upstream_addr, mut received) =
            recording_upstream(Duration::from_millis(200)).await;
        let addr = spawn_server(&format!("ws://{upstream_addr}"), Some("k")).await;

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        for text in ["A", "B", "C"] {
            client.send(Message::Text(text.into())).await.unwrap();
        }
        // Give the dial time to finish, then send one more in streaming state.
        tokio::time::sleep(Duration::from_millis(400)).await;
        client.send(Message::Text("D".into())).await.unwrap();

        for expected in ["A", "B", "C", "D"] {
            let msg = timeout(WAIT, received.recv()).await.unwrap().unwrap();
            assert_eq!(msg, Message::Text(expected.into()));
        }
    }

    // Scenario 2: dial refused → inbound closed with "upstream unavailable",
    // and the frame the client sent reaches nothing.
    #[tokio::test]
    async fn dial_failure_closes_inbound_with_1013() {
        // Bind then drop to get a port that refuses connections.
        let doomed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let refused_addr = doomed.local_addr().unwrap();
        drop(doomed);

        let (summary_tx, mut summaries) = mpsc::unbounded_channel();
        let server = Arc::new(RelayServer::with_hook(
            test_config(&format!("ws://{refused_addr}"), Some("k")),
            Arc::new(CaptureHook(summary_tx)),
        ));
        let addr = server.clone().spawn().await.unwrap();

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        client.send(Message::Text("ping".into())).await.unwrap();

        assert_eq!(expect_close_code(&mut client).await, Some(1013));

        let summary = timeout(WAIT, summaries.recv()).await.unwrap().unwrap();
        assert_eq!(summary.status, CloseStatus::UpstreamUnavailable);
        assert_eq!(summary.frames_to_upstream, 0);
    }

    // Scenario 3: upstream frames relayed in order, then its normal close
    // propagates to the client.
    #[tokio::test]
    async fn upstream_frames_then_normal_close_propagate() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            ws.send(Message::Text("X".into())).await.unwrap();
            ws.send(Message::Text("Y".into())).await.unwrap();
            ws.close(None).await.unwrap();
            // Drain until the close handshake completes.
            while ws.next().await.is_some() {}
        });

        let addr = spawn_server(&format!("ws://{upstream_addr}"), Some("k")).await;
        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        assert_eq!(expect_text(&mut client).await, "X");
        assert_eq!(expect_text(&mut client).await, "Y");
        let code = expect_close_code(&mut client).await;
        assert!(code.is_none() || code == Some(1000), "got {code:?}");
    }

    // Scenario 4 + P4: abrupt inbound drop mid-streaming closes the upstream
    // within a bounded time.
    #[tokio::test]
    async fn abrupt_inbound_close_tears_down_upstream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = listener.local_addr().unwrap();
        let (gone_tx, mut gone_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            loop {
                match ws.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        let _ = gone_tx.send(());
                        break;
                    }
                    _ => {}
                }
            }
        });

        let addr = spawn_server(&format!("ws://{upstream_addr}"), Some("k")).await;
        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        client.send(Message::Text("hello".into())).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        drop(client); // TCP drop, no close handshake

        timeout(Duration::from_secs(2), gone_rx.recv())
            .await
            .expect("upstream not closed within bounded time")
            .unwrap();
    }

    // P5: with no credential, sessions are refused with 1008 and the
    // upstream is never dialed.
    #[tokio::test]
    async fn missing_credential_refuses_sessions_without_dialing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = listener.local_addr().unwrap();

        let addr = spawn_server(&format!("ws://{upstream_addr}"), None).await;
        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        assert_eq!(expect_close_code(&mut client).await, Some(1008));

        // No connection attempt reaches the upstream listener.
        assert!(
            timeout(Duration::from_millis(300), listener.accept())
                .await
                .is_err(),
            "upstream connector was invoked despite missing credential"
        );
    }

    // P3: two concurrent sessions are isolated; killing one mid-streaming
    // leaves the other relaying.
    #[tokio::test]
    async fn sessions_are_isolated() {
        let upstream_addr = echo_upstream().await;
        let addr = spawn_server(&format!("ws://{upstream_addr}"), Some("k")).await;

        let (mut client_a, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        let (mut client_b, _) = connect_async(format!("ws://{addr}")).await.unwrap();

        client_a.send(Message::Text("a1".into())).await.unwrap();
        client_b.send(Message::Text("b1".into())).await.unwrap();
        assert_eq!(expect_text(&mut client_a).await, "a1");
        assert_eq!(expect_text(&mut client_b).await, "b1");

        drop(client_a); // abrupt death of session A

        client_b.send(Message::Text("b2".into())).await.unwrap();
        assert_eq!(expect_text(&mut client_b).await, "b2");
    }

    // Normal end-to-end close reports a Normal status with frame counts.
    #[tokio::test]
    async fn summary_reflects_relayed_frames() {
        let upstream_addr = echo_upstream().await;
        let (summary_tx, mut summaries) = mpsc::unbounded_channel();
        let server = Arc::new(RelayServer::with_hook(
            test_config(&format!("ws://{upstream_addr}"), Some("k")),
            Arc::new(CaptureHook(summary_tx)),
        ));
        let addr = server.clone().spawn().await.unwrap();

        let (mut client, _) = connect_async(format!("ws://{addr}")).await.unwrap();
        client.send(Message::Text("one".into())).await.unwrap();
        client.send(Message::Text("two".into())).await.unwrap();
        assert_eq!(expect_text(&mut client).await, "one");
        assert_eq!(expect_text(&mut client).await, "two");
        client.close(None).await.unwrap();
        while let Ok(Some(_)) = timeout(WAIT, client.next()).await {}

        let summary = timeout(WAIT, summaries.recv()).await.unwrap().unwrap();
        assert_eq!(summary.status, CloseStatus::Normal);
        assert_eq!(summary.frames_to_upstream, 2);
        assert_eq!(summary.frames_to_client, 2);
        assert_eq!(server.active_sessions(), 0);
    }
}
