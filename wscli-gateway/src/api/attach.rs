//! The attach path: terminal page and authenticated WebSocket upgrade.
//!
//! A non-upgrade `GET /ws/{sessionId}` serves the embedded terminal client
//! page. An upgrade runs the attach protocol in strict order before the
//! `101` is sent:
//!
//! 1. session-id shape,
//! 2. token extraction (`Sec-WebSocket-Protocol: bearer,<token>` preferred,
//!    `?token=` fallback),
//! 3. verification against the controller's key set,
//! 4. session-binding check,
//! 5. atomic token-id consume — the single-use enforcement point,
//! 6. pod route resolution,
//! 7. upstream connect and duplex splice.
//!
//! Steps 3 and 4 precede 5 so a malformed or mis-bound token cannot burn a
//! legitimate token id; 5 precedes 6 so a raced second attach observes the
//! id as gone even when the route lookup would fail anyway. Failures tear
//! the connection down without a body; reasons only go to the log.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts as _, Path, Query, Request};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::any;
use serde::Deserialize;
use tracing::{Instrument as _, instrument};
use wscli_capability::verify::{RemoteKeySet, VerifyError};
use wscli_store::{SessionStoreService, StoreError};
use wscli_types::SessionId;

use crate::metrics::{METRICS_ID_GATEWAY_ATTACH_REJECTED, METRICS_ID_GATEWAY_ATTACH_SUCCESS};
use crate::proxy;

/// The embedded terminal client page.
const TERMINAL_PAGE: &str = include_str!("../../assets/terminal.html");

/// Subprotocol marker preceding the token in the protocol list.
const BEARER_SUBPROTOCOL: &str = "bearer";

/// Everything the attach handler needs.
pub(crate) struct AttachArgs {
    pub(crate) store: SessionStoreService,
    pub(crate) key_set: Arc<RemoteKeySet>,
    pub(crate) terminal_port: u16,
    pub(crate) upstream_connect_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct AttachQuery {
    token: Option<String>,
}

/// All reasons an attach gets torn down. None of them reaches the peer.
#[derive(Debug, thiserror::Error)]
enum AttachError {
    #[error("no token presented")]
    TokenMissing,
    #[error(transparent)]
    Capability(#[from] VerifyError),
    #[error("token bound to a different session")]
    SessionBinding,
    #[error("token id already consumed or never recorded")]
    AlreadyConsumed,
    #[error("session absent or expired")]
    SessionGone,
    #[error("session has no pod placement")]
    NoPodIp,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cannot reach the pod terminal")]
    Upstream(#[source] proxy::UpstreamError),
}

/// Creates the `/ws/{session_id}` router.
pub(crate) fn routes(args: AttachArgs) -> Router {
    let args = Arc::new(args);
    Router::new().route(
        "/ws/{session_id}",
        any(
            move |Path(raw_id): Path<String>,
                  Query(query): Query<AttachQuery>,
                  request: Request| {
                attach(Arc::clone(&args), raw_id, query, request)
            },
        ),
    )
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

#[instrument(level = "debug", skip_all, fields(session_id = %raw_id))]
async fn attach(
    args: Arc<AttachArgs>,
    raw_id: String,
    query: AttachQuery,
    request: Request,
) -> Response {
    let Ok(session_id) = SessionId::parse_path_segment(&raw_id) else {
        tracing::debug!("rejecting attach: malformed session id");
        return StatusCode::NOT_FOUND.into_response();
    };

    if !is_websocket_upgrade(request.headers()) {
        return terminal_page();
    }

    let (mut parts, _body) = request.into_parts();
    let headers = parts.headers.clone();
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws,
        Err(rejection) => {
            tracing::debug!("destroying attach: bad upgrade request: {rejection:?}");
            return destroyed();
        }
    };

    let result = async {
        let token = extract_token(&headers, query.token).ok_or(AttachError::TokenMissing)?;
        let pod_ip = authorize(&args, session_id, &token.value).await?;
        // the store connection is back in the pool here; the long-lived
        // stream only owns the two sockets
        let upstream = proxy::connect_upstream(
            pod_ip,
            args.terminal_port,
            &token.forward_subprotocols,
            args.upstream_connect_timeout,
        )
        .await
        .map_err(AttachError::Upstream)?;
        Ok::<_, AttachError>((token, upstream))
    }
    .await;

    match result {
        Ok((token, upstream)) => {
            ::metrics::counter!(METRICS_ID_GATEWAY_ATTACH_SUCCESS).increment(1);
            let span = tracing::Span::current();
            let mut upgrade = ws;
            if token.via_subprotocol {
                upgrade = upgrade.protocols([BEARER_SUBPROTOCOL]);
            }
            upgrade
                .on_failed_upgrade(|err| {
                    tracing::warn!("could not establish websocket connection: {err:?}");
                })
                .on_upgrade(move |client| proxy::splice(client, upstream).instrument(span))
        }
        Err(err) => {
            ::metrics::counter!(METRICS_ID_GATEWAY_ATTACH_REJECTED).increment(1);
            tracing::debug!("destroying attach: {err:?}");
            destroyed()
        }
    }
}

/// Steps 3–6 of the attach protocol, in their required order.
async fn authorize(
    args: &AttachArgs,
    session_id: SessionId,
    token: &str,
) -> Result<IpAddr, AttachError> {
    let claims = args.key_set.verify_attach(token).await?;
    if claims.sid != session_id {
        return Err(AttachError::SessionBinding);
    }
    if !args.store.consume_token_id(claims.jti).await? {
        return Err(AttachError::AlreadyConsumed);
    }
    let record = args
        .store
        .get_session(session_id)
        .await?
        .ok_or(AttachError::SessionGone)?;
    record.pod_ip.ok_or(AttachError::NoPodIp)
}

struct ExtractedToken {
    value: String,
    via_subprotocol: bool,
    /// Subprotocols the client offered beyond the bearer pair; forwarded
    /// upstream so the pod terminal can pick its own.
    forward_subprotocols: Vec<String>,
}

fn extract_token(headers: &HeaderMap, query_token: Option<String>) -> Option<ExtractedToken> {
    let offered: Vec<String> = headers
        .get_all(header::SEC_WEBSOCKET_PROTOCOL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect();

    if let Some(position) = offered.iter().position(|entry| entry == BEARER_SUBPROTOCOL)
        && let Some(token) = offered.get(position + 1)
    {
        let forward_subprotocols = offered
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != position && *index != position + 1)
            .map(|(_, entry)| entry.clone())
            .collect();
        return Some(ExtractedToken {
            value: token.clone(),
            via_subprotocol: true,
            forward_subprotocols,
        });
    }

    query_token
        .filter(|token| !token.is_empty())
        .map(|value| ExtractedToken {
            value,
            via_subprotocol: false,
            forward_subprotocols: offered,
        })
}

/// Serves the terminal client page with caching disabled.
fn terminal_page() -> Response {
    (
        [(header::CACHE_CONTROL, HeaderValue::from_static("no-store"))],
        Html(TERMINAL_PAGE),
    )
        .into_response()
}

/// Opaque teardown of a failed upgrade: a bare status, no body.
fn destroyed() -> Response {
    StatusCode::FORBIDDEN.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protocol_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn subprotocol_token_is_preferred_over_query() {
        let extracted = extract_token(
            &protocol_headers("bearer,header-token"),
            Some("query-token".to_owned()),
        )
        .unwrap();
        assert_eq!(extracted.value, "header-token");
        assert!(extracted.via_subprotocol);
        assert!(extracted.forward_subprotocols.is_empty());
    }

    #[test]
    fn query_token_is_the_fallback() {
        let extracted = extract_token(&HeaderMap::new(), Some("query-token".to_owned())).unwrap();
        assert_eq!(extracted.value, "query-token");
        assert!(!extracted.via_subprotocol);
    }

    #[test]
    fn missing_token_is_none() {
        assert!(extract_token(&HeaderMap::new(), None).is_none());
        assert!(extract_token(&HeaderMap::new(), Some(String::new())).is_none());
        // a protocol list without the bearer marker carries no token
        assert!(extract_token(&protocol_headers("tty"), None).is_none());
    }

    #[test]
    fn remaining_subprotocols_are_forwarded() {
        let extracted = extract_token(&protocol_headers("tty, bearer, tok, binary"), None).unwrap();
        assert_eq!(extracted.value, "tok");
        assert_eq!(extracted.forward_subprotocols, vec!["tty", "binary"]);
    }
}
