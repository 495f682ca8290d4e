use axum::http::StatusCode;
use wscli_types::SessionId;

use crate::setup::TestGateway;


fn attach_path(session_id: SessionId) -> String {
    format!("/ws/{session_id}")
}

#[tokio::test]
async fn healthz_reports_ok() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let response = gateway.server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text("ok");
    Ok(())
}

#[tokio::test]
async fn non_upgrade_get_serves_the_terminal_page_uncached() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, _) = gateway.provision_session().await;

    let response = gateway.server.get(&attach_path(session_id)).await;
    response.assert_status_ok();
    assert_eq!(response.header("cache-control"), "no-store");
    let content_type = response.header("content-type");
    assert!(content_type.to_str().unwrap().starts_with("text/html"));
    response.assert_text_contains("WebSocket");
    Ok(())
}

#[tokio::test]
async fn malformed_session_id_is_not_found() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let response = gateway.server.get("/ws/not-a-session-id").await;
    response.assert_status(StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn attach_via_subprotocol_splices_bytes_both_ways() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, minted) = gateway.provision_session().await;

    let mut websocket = gateway
        .server
        .get_websocket(&attach_path(session_id))
        .add_header(
            "sec-websocket-protocol",
            format!("bearer,{}", minted.token),
        )
        .await
        .into_websocket()
        .await;

    websocket.send_text("echo me").await;
    websocket.assert_receive_text("echo me").await;
    websocket.send_text("and me").await;
    websocket.assert_receive_text("and me").await;

    // the one-time id is gone the moment the attach succeeded
    assert!(!gateway.store.token_id_exists(minted.token_id));
    Ok(())
}

#[tokio::test]
async fn attach_via_query_parameter_works() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, minted) = gateway.provision_session().await;

    let mut websocket = gateway
        .server
        .get_websocket(&format!(
            "{}?token={}",
            attach_path(session_id),
            minted.token
        ))
        .await
        .into_websocket()
        .await;

    websocket.send_text("over query").await;
    websocket.assert_receive_text("over query").await;
    Ok(())
}

#[tokio::test]
async fn replayed_token_is_destroyed() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, minted) = gateway.provision_session().await;

    // first attach consumes the token id
    let mut websocket = gateway
        .server
        .get_websocket(&attach_path(session_id))
        .add_header(
            "sec-websocket-protocol",
            format!("bearer,{}", minted.token),
        )
        .await
        .into_websocket()
        .await;
    websocket.send_text("hello").await;
    websocket.assert_receive_text("hello").await;

    // the replay is torn down without a body
    let response = gateway
        .server
        .get_websocket(&attach_path(session_id))
        .add_header(
            "sec-websocket-protocol",
            format!("bearer,{}", minted.token),
        )
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    response.assert_text("");
    Ok(())
}

#[tokio::test]
async fn token_bound_to_another_session_keeps_its_token_id() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (_, minted_a) = gateway.provision_session().await;
    let (session_b, _) = gateway.provision_session().await;

    let response = gateway
        .server
        .get_websocket(&attach_path(session_b))
        .add_header(
            "sec-websocket-protocol",
            format!("bearer,{}", minted_a.token),
        )
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    // the binding check precedes the consume, so A's token id survives
    assert!(gateway.store.token_id_exists(minted_a.token_id));
    Ok(())
}

#[tokio::test]
async fn missing_and_garbage_tokens_are_destroyed() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, minted) = gateway.provision_session().await;

    let response = gateway.server.get_websocket(&attach_path(session_id)).await;
    response.assert_status(StatusCode::FORBIDDEN);

    let response = gateway
        .server
        .get_websocket(&format!("{}?token=garbage", attach_path(session_id)))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    // neither attempt reached the consume step
    assert!(gateway.store.token_id_exists(minted.token_id));
    Ok(())
}

#[tokio::test]
async fn session_without_pod_placement_consumes_the_token() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, minted) = gateway.provision_unplaced_session().await;

    let response = gateway
        .server
        .get_websocket(&format!(
            "{}?token={}",
            attach_path(session_id),
            minted.token
        ))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    // consume precedes the route lookup; the failed attach burned the token
    assert!(!gateway.store.token_id_exists(minted.token_id));
    Ok(())
}

#[tokio::test]
async fn token_for_a_vanished_session_consumes_the_token() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, minted) = gateway.provision_orphan_token().await;

    let response = gateway
        .server
        .get_websocket(&format!(
            "{}?token={}",
            attach_path(session_id),
            minted.token
        ))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);
    assert!(!gateway.store.token_id_exists(minted.token_id));
    Ok(())
}

#[tokio::test]
async fn expired_token_fails_verification_before_the_consume() -> eyre::Result<()> {
    let gateway = TestGateway::start().await?;
    let (session_id, _) = gateway.provision_session().await;
    // exp == iat == now, rejected at verification
    let minted = gateway
        .mint_and_record(session_id, std::time::Duration::from_secs(0))
        .await;

    let response = gateway
        .server
        .get_websocket(&format!(
            "{}?token={}",
            attach_path(session_id),
            minted.token
        ))
        .await;
    response.assert_status(StatusCode::FORBIDDEN);

    // verification precedes the consume, so the (expired) row is untouched
    assert!(gateway.store.token_id_exists(minted.token_id));
    Ok(())
}
