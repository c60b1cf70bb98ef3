//! Upstream connector: one authenticated outbound dial per session.
//!
//! The credential is attached per the configured scheme (query parameter or
//! header). Exactly one attempt, bounded by the configured timeout; retry
//! policy belongs to callers, not here. The credential never appears in logs
//! or error messages.

use crate::config::{AuthScheme, UpstreamConfig};
use parley_core::{RelayError, RelayResult};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue, Uri};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// The upstream half of a session.
pub type UpstreamStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Build the upgrade request for the upstream endpoint with the credential
/// attached.
pub fn build_request(config: &UpstreamConfig, credential: &str) -> RelayResult<Request> {
    match config.auth_scheme {
        AuthScheme::Query => {
            let mut request = config
                .endpoint
                .as_str()
                .into_client_request()
                .map_err(|e| RelayError::Config(format!("invalid upstream endpoint: {e}")))?;

            // Rebuild path-and-query through `Uri` parts so a path-less
            // endpoint still yields a request target starting with '/'.
            let mut parts = request.uri().clone().into_parts();
            let (path, query) = match parts.path_and_query.as_ref() {
                Some(pq) => {
                    let path = if pq.path().is_empty() { "/" } else { pq.path() };
                    (path.to_string(), pq.query().map(|q| q.to_string()))
                }
                None => ("/".to_string(), None),
            };
            let path_and_query = match query {
                Some(q) => format!("{path}?{q}&{}={credential}", config.auth_param),
                None => format!("{path}?{}={credential}", config.auth_param),
            };
            parts.path_and_query = Some(
                path_and_query
                    .parse()
                    .map_err(|e| RelayError::Config(format!("invalid upstream query: {e}")))?,
            );
            *request.uri_mut() = Uri::from_parts(parts)
                .map_err(|e| RelayError::Config(format!("invalid upstream endpoint: {e}")))?;
            Ok(request)
        }
        AuthScheme::Header => {
            let mut request = config
                .endpoint
                .as_str()
                .into_client_request()
                .map_err(|e| RelayError::Config(format!("invalid upstream endpoint: {e}")))?;
            let name = HeaderName::from_bytes(config.auth_param.as_bytes())
                .map_err(|e| RelayError::Config(format!("invalid auth header name: {e}")))?;
            let value = HeaderValue::from_str(credential)
                .map_err(|_| RelayError::Config("credential not valid in a header".to_string()))?;
            request.headers_mut().insert(name, value);
            Ok(request)
        }
    }
}

/// Dial the upstream endpoint. One attempt; refusal, reset, or timeout is
/// surfaced as an error and the session is expected to close its inbound
/// side with an "upstream unavailable" status.
pub async fn dial(config: &UpstreamConfig, credential: &str) -> RelayResult<UpstreamStream> {
    let request = build_request(config, credential)?;

    match tokio::time::timeout(config.dial_timeout, connect_async(request)).await {
        Ok(Ok((ws_stream, _response))) => {
            debug!(endpoint = %config.endpoint, "upstream connected");
            Ok(ws_stream)
        }
        Ok(Err(e)) => {
            warn!(endpoint = %config.endpoint, error = %e, "upstream dial failed");
            Err(RelayError::Upstream(e.to_string()))
        }
        Err(_) => {
            warn!(
                endpoint = %config.endpoint,
                timeout_ms = config.dial_timeout.as_millis() as u64,
                "upstream dial timed out"
            );
            Err(RelayError::Timeout)
        }
    }
}
