//! Upstream connection and duplex splicing.
//!
//! Once an attach is authorized the gateway owns exactly two sockets: the
//! upgraded client connection and the plain-WebSocket connection to the
//! pod's terminal server. Frames are forwarded in both directions until
//! either side closes or errors; the gateway adds no inactivity timeout
//! (the terminal server is expected to ping) and never retries.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use axum::extract::ws::{self, WebSocket};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::{self, protocol::CloseFrame};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::metrics::{METRICS_ID_GATEWAY_PROXY_ACTIVE, METRICS_ID_GATEWAY_PROXY_DURATION};

pub(crate) type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Errors while establishing the upstream connection.
#[derive(Debug, thiserror::Error)]
pub(crate) enum UpstreamError {
    #[error("upstream connect timed out")]
    ConnectTimeout,
    #[error("upstream handshake failed")]
    Handshake(#[from] tungstenite::Error),
    #[error("invalid upstream request")]
    Request(#[source] tungstenite::Error),
}

/// Opens the WebSocket to the pod terminal, forwarding the client's
/// remaining subprotocol offers.
pub(crate) async fn connect_upstream(
    pod_ip: IpAddr,
    port: u16,
    subprotocols: &[String],
    timeout: Duration,
) -> Result<UpstreamSocket, UpstreamError> {
    let url = match pod_ip {
        IpAddr::V4(ip) => format!("ws://{ip}:{port}/"),
        IpAddr::V6(ip) => format!("ws://[{ip}]:{port}/"),
    };
    tracing::debug!("connecting upstream to {url}");
    let mut request = url.into_client_request().map_err(UpstreamError::Request)?;
    if !subprotocols.is_empty()
        && let Ok(value) = subprotocols.join(", ").parse()
    {
        request
            .headers_mut()
            .insert(http::header::SEC_WEBSOCKET_PROTOCOL, value);
    }
    let (socket, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| UpstreamError::ConnectTimeout)??;
    Ok(socket)
}

/// Splices frames between the client and the pod until either side closes.
pub(crate) async fn splice(client: WebSocket, upstream: UpstreamSocket) {
    ::metrics::gauge!(METRICS_ID_GATEWAY_PROXY_ACTIVE).increment(1);
    let started = Instant::now();
    tracing::debug!("proxy stream established");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            inbound = client_rx.next() => match inbound {
                Some(Ok(message)) => {
                    let closing = matches!(message, ws::Message::Close(_));
                    if upstream_tx.send(client_to_upstream(message)).await.is_err() || closing {
                        break;
                    }
                }
                Some(Err(err)) => {
                    tracing::debug!("client stream error: {err:?}");
                    break;
                }
                None => break,
            },
            outbound = upstream_rx.next() => match outbound {
                Some(Ok(message)) => {
                    let Some(message) = upstream_to_client(message) else {
                        continue;
                    };
                    let closing = matches!(message, ws::Message::Close(_));
                    if client_tx.send(message).await.is_err() || closing {
                        break;
                    }
                }
                Some(Err(err)) => {
                    tracing::debug!("upstream stream error: {err:?}");
                    break;
                }
                None => break,
            },
        }
    }

    // dropping both halves tears down whichever side is still open
    ::metrics::gauge!(METRICS_ID_GATEWAY_PROXY_ACTIVE).decrement(1);
    ::metrics::histogram!(METRICS_ID_GATEWAY_PROXY_DURATION)
        .record(started.elapsed().as_millis() as f64);
    tracing::debug!("proxy stream closed");
}

fn client_to_upstream(message: ws::Message) -> tungstenite::Message {
    match message {
        ws::Message::Text(text) => tungstenite::Message::text(text.to_string()),
        ws::Message::Binary(data) => tungstenite::Message::Binary(data),
        ws::Message::Ping(data) => tungstenite::Message::Ping(data),
        ws::Message::Pong(data) => tungstenite::Message::Pong(data),
        ws::Message::Close(frame) => tungstenite::Message::Close(frame.map(|frame| CloseFrame {
            code: frame.code.into(),
            reason: frame.reason.to_string().into(),
        })),
    }
}

fn upstream_to_client(message: tungstenite::Message) -> Option<ws::Message> {
    match message {
        tungstenite::Message::Text(text) => Some(ws::Message::Text(text.to_string().into())),
        tungstenite::Message::Binary(data) => Some(ws::Message::Binary(data)),
        tungstenite::Message::Ping(data) => Some(ws::Message::Ping(data)),
        tungstenite::Message::Pong(data) => Some(ws::Message::Pong(data)),
        tungstenite::Message::Close(frame) => {
            Some(ws::Message::Close(frame.map(|frame| ws::CloseFrame {
                code: frame.code.into(),
                reason: frame.reason.to_string().into(),
            })))
        }
        // raw frames never surface from a read
        tungstenite::Message::Frame(_) => None,
    }
}
