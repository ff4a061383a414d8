//! WebSocket transport built on tokio-tungstenite.
//!
//! Each link runs in a dedicated tokio task that dials, pumps frames in
//! both directions, and re-dials with a fixed backoff until the configured
//! attempt budget is spent. A handshake refused with 401/403 is final.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue, StatusCode};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use parley_shared::Frame;

use crate::error::NetError;
use crate::transport::{ConnectOptions, Transport, TransportEvent, TransportLink, LINK_CHANNEL_CAPACITY};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live transport speaking JSON text frames over a WebSocket.
#[derive(Debug, Clone, Default)]
pub struct WsTransport;

impl Transport for WsTransport {
    fn open(&self, options: ConnectOptions) -> TransportLink {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Frame>(LINK_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(LINK_CHANNEL_CAPACITY);
        let shutdown = CancellationToken::new();

        tokio::spawn(run_link(options, outbound_rx, event_tx, shutdown.clone()));

        TransportLink {
            outbound: outbound_tx,
            inbound: event_rx,
            shutdown,
        }
    }
}

/// Build the handshake request carrying the bearer credential.
pub fn handshake_request(options: &ConnectOptions) -> Result<Request, NetError> {
    let mut request = options.url.as_str().into_client_request()?;
    let value = HeaderValue::from_str(&format!("Bearer {}", options.auth_token))
        .map_err(|_| NetError::InvalidCredential)?;
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(request)
}

enum Closed {
    /// Local shutdown; do not reconnect.
    Shutdown,
    /// The connection dropped underneath us.
    Remote(String),
}

async fn run_link(
    options: ConnectOptions,
    mut outbound_rx: mpsc::Receiver<Frame>,
    event_tx: mpsc::Sender<TransportEvent>,
    shutdown: CancellationToken,
) {
    let mut attempt = 0u32;

    loop {
        let request = match handshake_request(&options) {
            Ok(r) => r,
            Err(e) => {
                let _ = event_tx
                    .send(TransportEvent::ConnectError {
                        message: e.to_string(),
                        auth_rejected: false,
                    })
                    .await;
                return;
            }
        };

        debug!(url = %options.url, attempt, "Dialing live connection");

        let dialed = tokio::select! {
            _ = shutdown.cancelled() => return,
            result = connect_async(request) => result,
        };

        match dialed {
            Ok((socket, _response)) => {
                attempt = 0;
                info!(url = %options.url, "Live connection established");
                if event_tx.send(TransportEvent::Connected).await.is_err() {
                    return;
                }

                match pump_socket(socket, &mut outbound_rx, &event_tx, &shutdown).await {
                    Closed::Shutdown => return,
                    Closed::Remote(reason) => {
                        warn!(reason = %reason, "Live connection dropped");
                        if event_tx
                            .send(TransportEvent::Disconnected { reason })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Err(tungstenite::Error::Http(response))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                warn!(status = %response.status(), "Live connection rejected the credential");
                let _ = event_tx
                    .send(TransportEvent::ConnectError {
                        message: format!("handshake rejected: {}", response.status()),
                        auth_rejected: true,
                    })
                    .await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Live connection handshake failed");
                if event_tx
                    .send(TransportEvent::ConnectError {
                        message: e.to_string(),
                        auth_rejected: false,
                    })
                    .await
                    .is_err()
                {
                    return;
                }
            }
        }

        attempt += 1;
        if attempt > options.reconnection_attempts {
            warn!(
                attempts = options.reconnection_attempts,
                "Reconnection attempts exhausted, giving up"
            );
            return;
        }

        let _ = event_tx.send(TransportEvent::Reconnecting { attempt }).await;

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(options.reconnection_delay) => {}
        }
    }
}

async fn pump_socket(
    socket: Socket,
    outbound_rx: &mut mpsc::Receiver<Frame>,
    event_tx: &mpsc::Sender<TransportEvent>,
    shutdown: &CancellationToken,
) -> Closed {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return Closed::Shutdown;
            }

            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(Message::Close(None)).await;
                    return Closed::Shutdown;
                };
                match frame.to_json() {
                    Ok(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            return Closed::Remote(e.to_string());
                        }
                    }
                    Err(e) => warn!(event = %frame.event, error = %e, "Dropping unencodable frame"),
                }
            }

            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => match Frame::from_json(&text) {
                        Ok(frame) => {
                            if event_tx.send(TransportEvent::Frame(frame)).await.is_err() {
                                return Closed::Shutdown;
                            }
                        }
                        Err(e) => debug!(error = %e, "Ignoring malformed frame"),
                    },
                    Some(Ok(Message::Close(close))) => {
                        let reason = close
                            .map(|c| c.reason.to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "closed by server".to_string());
                        return Closed::Remote(reason);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Closed::Remote(e.to_string()),
                    None => return Closed::Remote("stream ended".to_string()),
                }
            }
        }
    }
}
