use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum_test::TestServer;
use parking_lot::Mutex;
use secrecy::SecretString;
use tokio_util::sync::CancellationToken;
use wscli_common::StartedServices;
use wscli_controller::config::{CallerAuthMode, ControllerConfig, Environment};
use wscli_controller::services::orchestrator::{
    JobRequest, Orchestrator, OrchestratorError, PodPlacement,
};
use wscli_store::memory::MemorySessionStore;

pub const ALICE_KEY: &str = "alice-s3cret";
pub const BOB_KEY: &str = "bob-s3cret";
pub const POD_IP: &str = "10.0.0.5";

/// How the fake cluster places pods.
#[derive(Clone, Copy)]
pub enum PlacementMode {
    /// Every job's pod immediately reports the given IP.
    Immediate,
    /// No pod ever gets scheduled.
    Never,
}

/// Records submitted jobs and replays the configured placement.
pub struct FakeOrchestrator {
    mode: PlacementMode,
    jobs: Mutex<Vec<JobRequest>>,
}

impl FakeOrchestrator {
    pub fn new(mode: PlacementMode) -> Self {
        Self {
            mode,
            jobs: Mutex::new(Vec::new()),
        }
    }

    pub fn submitted_jobs(&self) -> Vec<JobRequest> {
        self.jobs.lock().clone()
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn create_job(&self, request: &JobRequest) -> Result<(), OrchestratorError> {
        self.jobs.lock().push(request.clone());
        Ok(())
    }

    async fn await_pod_ip(
        &self,
        job_name: &str,
        deadline: Duration,
    ) -> Result<PodPlacement, OrchestratorError> {
        match self.mode {
            PlacementMode::Immediate => Ok(PodPlacement {
                pod_name: format!("{job_name}-aaaaa"),
                pod_ip: POD_IP.parse::<IpAddr>().expect("valid test ip"),
            }),
            PlacementMode::Never => {
                tokio::time::sleep(deadline).await;
                Err(OrchestratorError::DiscoveryTimeout)
            }
        }
    }
}

pub struct TestController {
    pub server: TestServer,
    pub store: Arc<MemorySessionStore>,
    pub orchestrator: Arc<FakeOrchestrator>,
    pub _cancellation_token: CancellationToken,
}

impl TestController {
    pub async fn start(mode: PlacementMode) -> eyre::Result<Self> {
        Self::start_with(mode, |_| {}).await
    }

    pub async fn start_with(
        mode: PlacementMode,
        tweak: impl FnOnce(&mut ControllerConfig),
    ) -> eyre::Result<Self> {
        let mut config = test_config();
        tweak(&mut config);

        let store = Arc::new(MemorySessionStore::new());
        let orchestrator = Arc::new(FakeOrchestrator::new(mode));
        let cancellation_token = CancellationToken::new();

        let store_service: wscli_store::SessionStoreService =
            Arc::clone(&store) as wscli_store::SessionStoreService;
        let orchestrator_service: wscli_controller::services::orchestrator::OrchestratorService =
            Arc::clone(&orchestrator)
                as wscli_controller::services::orchestrator::OrchestratorService;
        let router = wscli_controller::init(
            &config,
            store_service,
            orchestrator_service,
            StartedServices::new(),
            cancellation_token.clone(),
        )
        .await?;

        let server = TestServer::builder()
            .http_transport()
            .build(router)
            .expect("Can build test-server");
        Ok(Self {
            server,
            store,
            orchestrator,
            _cancellation_token: cancellation_token,
        })
    }

    /// Base URL of the test server without a trailing slash.
    pub fn base_url(&self) -> String {
        let address = self
            .server
            .server_address()
            .expect("http transport has an address");
        address.to_string().trim_end_matches('/').to_owned()
    }
}

fn test_config() -> ControllerConfig {
    ControllerConfig {
        environment: Environment::Dev,
        bind_addr: "127.0.0.1:0".parse().expect("valid addr"),
        namespace: "ws-cli".to_owned(),
        runner_image: "wscli-runner:test".to_owned(),
        job_ttl: Duration::from_secs(300),
        job_active_deadline: Duration::from_secs(3600),
        session_expiry: Duration::from_secs(600),
        pod_discovery_timeout: Duration::from_secs(5),
        allowed_origins: String::new(),
        allowed_code_domains: "github.com,*.example.org".to_owned(),
        rate_limit_window: Duration::from_secs(60),
        rate_limit_max: 100,
        rate_limit_skip_paths: String::new(),
        db_connection_string: SecretString::from("postgres://unused"),
        db_max_connections: NonZeroU32::new(1).expect("non-zero"),
        db_idle_timeout: Duration::from_secs(30),
        caller_auth_mode: CallerAuthMode::ApiKey,
        api_keys: SecretString::from(format!("alice:{ALICE_KEY},bob:{BOB_KEY}")),
        identity_jwks_url: None,
        identity_issuer: None,
        identity_audience: None,
        key_material: None,
        sweep_interval: Duration::from_secs(60),
        max_wait_time_shutdown: Duration::from_secs(1),
    }
}
