//! The per-session relay state machine.
//!
//! One session pairs one inbound WebSocket with at most one upstream
//! WebSocket and moves through `Init → Dialing → Streaming → Closing →
//! Closed`. All six event kinds (inbound frame, upstream frame, inbound
//! close, upstream close, upstream open, upstream error) are serialized
//! through this task's select loop, so a session needs no locks; different
//! sessions run in parallel and share only the read-only credential.
//!
//! Frames are forwarded unmodified, in arrival order. Forwarding awaits the
//! destination sink, so backpressure delays later frames instead of
//! reordering them. A close or write failure on either side closes the
//! other with a status that distinguishes "never connected" from "ended
//! mid-session" from "completed normally".

use super::buffer::FrameBuffer;
use super::upstream::{self, UpstreamStream};
use super::SessionSummary;
use crate::config::UpstreamConfig;
use futures_util::{Sink, SinkExt, StreamExt};
use parley_core::{CloseStatus, Frame};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// Relay lifecycle states (logged on transition).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    Init,
    Dialing,
    Streaming,
    Closing,
    Closed,
}

/// The inbound half of a session.
pub type ClientStream = WebSocketStream<TcpStream>;

/// Owns the paired connections for one session and drives them to
/// completion. Constructed by the listener, one per accepted connection.
pub struct SessionRelay {
    session_id: String,
    upstream_config: UpstreamConfig,
    credential: Arc<str>,
}

impl SessionRelay {
    /// Create a relay for one accepted inbound connection.
    pub fn new(session_id: String, upstream_config: UpstreamConfig, credential: Arc<str>) -> Self {
        Self {
            session_id,
            upstream_config,
            credential,
        }
    }

    /// Run the session to completion and return its summary.
    ///
    /// Consumes the relay; when this returns, both connection handles have
    /// been dropped and no further frames are processed for this session.
    pub async fn run(self, client_ws: ClientStream) -> SessionSummary {
        let started = Instant::now();
        let session_id = self.session_id.clone();
        let (mut client_sink, mut client_stream) = client_ws.split();

        let mut frames_to_upstream: u64 = 0;
        let mut frames_to_client: u64 = 0;

        self.transition(RelayState::Init, RelayState::Dialing);

        // DIALING: drive the dial and the inbound stream together so inbound
        // frames buffer without blocking and an inbound close aborts the
        // dial (the dropped future cancels the connect — no upstream leak).
        let mut buffer = FrameBuffer::new();
        let dial = upstream::dial(&self.upstream_config, &self.credential);
        tokio::pin!(dial);

        let upstream_ws: UpstreamStream = loop {
            tokio::select! {
                result = &mut dial => match result {
                    Ok(ws) => break ws,
                    Err(e) => {
                        if !buffer.is_empty() {
                            // Documented loss: frames buffered for a dial
                            // that never completed go nowhere.
                            warn!(
                                session_id = %session_id,
                                frames_lost = buffer.len(),
                                "discarding buffered frames after failed dial"
                            );
                        }
                        debug!(session_id = %session_id, error = %e, "upstream failed");
                        self.transition(RelayState::Dialing, RelayState::Closing);
                        let status = CloseStatus::UpstreamUnavailable;
                        send_close(&mut client_sink, &status).await;
                        return self.finish(status, frames_to_upstream, frames_to_client, started);
                    }
                },
                msg = client_stream.next() => match msg {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                        if let Some(frame) = frame_of(msg) {
                            // Buffer never rejects before its drain.
                            let _ = buffer.enqueue(frame);
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                        // Inbound closed or faulted while dialing; abort the
                        // dial and release everything.
                        debug!(session_id = %session_id, "inbound ended during dial");
                        self.transition(RelayState::Dialing, RelayState::Closing);
                        return self.finish(
                            CloseStatus::Normal,
                            frames_to_upstream,
                            frames_to_client,
                            started,
                        );
                    }
                    Some(Ok(_)) => {} // ping/pong, answered by the transport
                },
            }
        };

        // Upstream ready: drain the buffer before any live forwarding so
        // total order holds across the Dialing → Streaming transition.
        let buffered = buffer.drain();
        if !buffered.is_empty() {
            debug!(
                session_id = %session_id,
                count = buffered.len(),
                "draining buffered frames to upstream"
            );
        }
        let (mut upstream_sink, mut upstream_stream) = upstream_ws.split();
        for frame in buffered {
            if let Err(e) = upstream_sink.send(message_of(frame)).await {
                warn!(session_id = %session_id, error = %e, "upstream write failed during drain");
                self.transition(RelayState::Dialing, RelayState::Closing);
                let status = CloseStatus::TransportFault("upstream write failed".to_string());
                send_close(&mut client_sink, &status).await;
                return self.finish(status, frames_to_upstream, frames_to_client, started);
            }
            frames_to_upstream += 1;
        }

        self.transition(RelayState::Dialing, RelayState::Streaming);

        // STREAMING: forward both directions until one side ends.
        let status = loop {
            tokio::select! {
                msg = client_stream.next() => match msg {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                        if let Err(e) = upstream_sink.send(msg).await {
                            warn!(session_id = %session_id, error = %e, "upstream write failed");
                            let status = CloseStatus::TransportFault("upstream write failed".to_string());
                            send_close(&mut client_sink, &status).await;
                            break status;
                        }
                        frames_to_upstream += 1;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(session_id = %session_id, "inbound closed");
                        let status = status_of_close(&frame);
                        let _ = upstream_sink.send(Message::Close(frame)).await;
                        break status;
                    }
                    Some(Ok(_)) => {} // ping/pong, answered by the transport
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "inbound read error");
                        let status = CloseStatus::TransportFault("inbound connection lost".to_string());
                        send_close(&mut upstream_sink, &status).await;
                        break status;
                    }
                    None => {
                        debug!(session_id = %session_id, "inbound connection lost");
                        let status = CloseStatus::TransportFault("inbound connection lost".to_string());
                        send_close(&mut upstream_sink, &status).await;
                        break status;
                    }
                },
                msg = upstream_stream.next() => match msg {
                    Some(Ok(msg @ (Message::Text(_) | Message::Binary(_)))) => {
                        if let Err(e) = client_sink.send(msg).await {
                            warn!(session_id = %session_id, error = %e, "inbound write failed");
                            let status = CloseStatus::TransportFault("inbound write failed".to_string());
                            send_close(&mut upstream_sink, &status).await;
                            break status;
                        }
                        frames_to_client += 1;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(session_id = %session_id, "upstream closed");
                        let status = status_of_close(&frame);
                        let _ = client_sink.send(Message::Close(frame)).await;
                        break status;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "upstream read error");
                        let status = CloseStatus::TransportFault("upstream connection lost".to_string());
                        send_close(&mut client_sink, &status).await;
                        break status;
                    }
                    None => {
                        debug!(session_id = %session_id, "upstream connection lost");
                        let status = CloseStatus::TransportFault("upstream connection lost".to_string());
                        send_close(&mut client_sink, &status).await;
                        break status;
                    }
                },
            }
        };

        self.transition(RelayState::Streaming, RelayState::Closing);
        self.finish(status, frames_to_upstream, frames_to_client, started)
    }

    fn transition(&self, from: RelayState, to: RelayState) {
        debug!(session_id = %self.session_id, ?from, ?to, "relay state");
    }

    /// CLOSED: both halves drop with the relay; assemble the summary.
    fn finish(
        &self,
        status: CloseStatus,
        frames_to_upstream: u64,
        frames_to_client: u64,
        started: Instant,
    ) -> SessionSummary {
        self.transition(RelayState::Closing, RelayState::Closed);
        SessionSummary {
            session_id: self.session_id.clone(),
            status,
            frames_to_upstream,
            frames_to_client,
            duration: started.elapsed(),
        }
    }
}

/// Send a close frame carrying the status's code and reason; errors are
/// ignored (the peer may already be gone).
pub(crate) async fn send_close<S>(sink: &mut S, status: &CloseStatus)
where
    S: Sink<Message> + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(status.code()),
        reason: status.reason().into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
}

/// Map a peer's close frame to the status propagated to the other side.
fn status_of_close(frame: &Option<CloseFrame<'_>>) -> CloseStatus {
    match frame {
        None => CloseStatus::Normal,
        Some(cf) if cf.code == CloseCode::Normal => CloseStatus::Normal,
        Some(cf) => CloseStatus::Mirrored {
            code: cf.code.into(),
            reason: cf.reason.to_string(),
        },
    }
}

/// Extract the opaque payload from a data message; `None` for control
/// messages.
fn frame_of(msg: Message) -> Option<Frame> {
    match msg {
        Message::Text(s) => Some(Frame::Text(s)),
        Message::Binary(b) => Some(Frame::Binary(b)),
        _ => None,
    }
}

fn message_of(frame: Frame) -> Message {
    match frame {
        Frame::Text(s) => Message::Text(s),
        Frame::Binary(b) => Message::Binary(b),
    }
}
