//! Sandbox job submission and pod-IP discovery.
//!
//! The [`Orchestrator`] trait is the seam between the session flow and the
//! cluster; [`KubeOrchestrator`] is the deployment implementation over the
//! Kubernetes API. Discovery is modeled as "observe until the first
//! non-empty pod IP": bounded polling with a jittered interval, and a
//! deterministic tie-break (lexicographically first pod name) so a retried
//! discovery lands on the same pod.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Pod, PodSpec, PodTemplateSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, PostParams};
use kube::Client;
use rand::Rng as _;
use tracing::instrument;
use wscli_types::api::TERMINAL_PORT;
use wscli_types::SessionId;

/// Label carrying the owning session id on jobs and pods.
const SESSION_LABEL: &str = "wscli/session-id";
/// Label carrying the job name on pods; what discovery selects on.
const JOB_LABEL: &str = "wscli/job-name";

/// Jitter bounds for the discovery poll interval.
const POLL_INTERVAL_MIN_MS: u64 = 500;
const POLL_INTERVAL_MAX_MS: u64 = 1500;

/// Errors surfaced by orchestrator implementations.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Job submission failed.
    #[error("job submission failed")]
    Submit(#[source] kube::Error),
    /// No pod exposed an IP within the deadline.
    #[error("pod discovery timed out")]
    DiscoveryTimeout,
}

/// Everything needed to submit one sandbox job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    /// The owning session.
    pub session_id: SessionId,
    /// Unique job name, derived from the session id.
    pub job_name: String,
    /// Source archive the sandbox downloads.
    pub code_url: String,
    /// Optional archive checksum.
    pub code_checksum: Option<String>,
    /// Optional launch command.
    pub command: Option<String>,
    /// Optional prompt forwarded to the workload.
    pub prompt: Option<String>,
}

/// The discovered pod placement of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodPlacement {
    /// Name of the chosen pod.
    pub pod_name: String,
    /// The pod's cluster IP.
    pub pod_ip: IpAddr,
}

/// Seam between the session flow and the cluster.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Submits the sandbox job.
    async fn create_job(&self, request: &JobRequest) -> Result<(), OrchestratorError>;

    /// Waits until a pod of `job_name` exposes a non-empty IP, up to
    /// `deadline`.
    async fn await_pod_ip(
        &self,
        job_name: &str,
        deadline: Duration,
    ) -> Result<PodPlacement, OrchestratorError>;
}

/// Shared handle to an [`Orchestrator`].
pub type OrchestratorService = Arc<dyn Orchestrator>;

/// Lifecycle bounds applied to every submitted job.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Container image of the sandbox.
    pub runner_image: String,
    /// `ttl_seconds_after_finished` of submitted jobs.
    pub job_ttl: Duration,
    /// `active_deadline_seconds` of submitted jobs.
    pub job_active_deadline: Duration,
}

/// [`Orchestrator`] over the Kubernetes API.
pub struct KubeOrchestrator {
    jobs: Api<Job>,
    pods: Api<Pod>,
    settings: JobSettings,
}

impl KubeOrchestrator {
    /// Connects to the cluster using the ambient kubeconfig/in-cluster
    /// environment.
    #[instrument(level = "info", skip_all, fields(namespace = %namespace))]
    pub async fn init(namespace: &str, settings: JobSettings) -> eyre::Result<Self> {
        tracing::info!("connecting to the orchestrator..");
        let client = Client::try_default().await?;
        Ok(Self {
            jobs: Api::namespaced(client.clone(), namespace),
            pods: Api::namespaced(client, namespace),
            settings,
        })
    }

    fn build_job(&self, request: &JobRequest) -> Job {
        let labels = BTreeMap::from([
            (SESSION_LABEL.to_owned(), request.session_id.to_string()),
            (JOB_LABEL.to_owned(), request.job_name.clone()),
        ]);

        let mut env = vec![
            env_var("SESSION_ID", request.session_id.to_string()),
            env_var("CODE_URL", request.code_url.clone()),
        ];
        if let Some(checksum) = &request.code_checksum {
            env.push(env_var("CODE_CHECKSUM", checksum.clone()));
        }
        if let Some(command) = &request.command {
            // passed as a plain env value; nothing on this side of the
            // boundary ever runs it through a shell
            env.push(env_var("WSCLI_COMMAND", command.clone()));
        }
        if let Some(prompt) = &request.prompt {
            env.push(env_var("WSCLI_PROMPT", prompt.clone()));
        }

        let container = Container {
            name: "sandbox".to_owned(),
            image: Some(self.settings.runner_image.clone()),
            env: Some(env),
            ports: Some(vec![ContainerPort {
                container_port: i32::from(TERMINAL_PORT),
                name: Some("terminal".to_owned()),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Job {
            metadata: ObjectMeta {
                name: Some(request.job_name.clone()),
                labels: Some(labels.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                ttl_seconds_after_finished: Some(self.settings.job_ttl.as_secs() as i32),
                active_deadline_seconds: Some(self.settings.job_active_deadline.as_secs() as i64),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_owned()),
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        }
    }
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_owned(),
        value: Some(value),
        ..Default::default()
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    #[instrument(level = "info", skip_all, fields(job_name = %request.job_name))]
    async fn create_job(&self, request: &JobRequest) -> Result<(), OrchestratorError> {
        tracing::info!("submitting sandbox job..");
        let job = self.build_job(request);
        self.jobs
            .create(&PostParams::default(), &job)
            .await
            .map_err(OrchestratorError::Submit)?;
        Ok(())
    }

    #[instrument(level = "info", skip_all, fields(job_name = %job_name))]
    async fn await_pod_ip(
        &self,
        job_name: &str,
        deadline: Duration,
    ) -> Result<PodPlacement, OrchestratorError> {
        let list_params = ListParams::default().labels(&format!("{JOB_LABEL}={job_name}"));
        let poll = async {
            loop {
                match self.pods.list(&list_params).await {
                    Ok(pod_list) => {
                        if let Some(placement) = first_placed_pod(pod_list.items) {
                            tracing::info!(
                                pod_name = %placement.pod_name,
                                pod_ip = %placement.pod_ip,
                                "pod IP assigned"
                            );
                            return placement;
                        }
                    }
                    // transient API errors are retried until the deadline
                    Err(err) => tracing::warn!("pod list failed during discovery: {err:?}"),
                }
                let jitter_ms =
                    rand::thread_rng().gen_range(POLL_INTERVAL_MIN_MS..=POLL_INTERVAL_MAX_MS);
                tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
            }
        };
        tokio::time::timeout(deadline, poll)
            .await
            .map_err(|_| OrchestratorError::DiscoveryTimeout)
    }
}

/// Picks the placed pod with the lexicographically first name.
fn first_placed_pod(pods: Vec<Pod>) -> Option<PodPlacement> {
    pods.into_iter()
        .filter_map(|pod| {
            let pod_name = pod.metadata.name?;
            let pod_ip = pod
                .status
                .as_ref()
                .and_then(|status| status.pod_ip.as_ref())
                .filter(|ip| !ip.is_empty())
                .and_then(|ip| ip.parse().ok())?;
            Some(PodPlacement { pod_name, pod_ip })
        })
        .min_by(|a, b| a.pod_name.cmp(&b.pod_name))
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::PodStatus;

    use super::*;

    fn pod(name: &str, ip: Option<&str>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_owned()),
                ..Default::default()
            },
            status: Some(PodStatus {
                pod_ip: ip.map(str::to_owned),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn pods_without_an_ip_are_skipped() {
        assert_eq!(first_placed_pod(vec![pod("a", None), pod("b", Some(""))]), None);
        let placement = first_placed_pod(vec![pod("a", None), pod("b", Some("10.0.0.7"))]);
        assert_eq!(
            placement,
            Some(PodPlacement {
                pod_name: "b".to_owned(),
                pod_ip: "10.0.0.7".parse().unwrap(),
            })
        );
    }

    #[test]
    fn tie_break_is_lexicographic_on_pod_name() {
        let placement = first_placed_pod(vec![
            pod("wscli-x-zzz", Some("10.0.0.9")),
            pod("wscli-x-aaa", Some("10.0.0.5")),
            pod("wscli-x-mmm", Some("10.0.0.7")),
        ])
        .unwrap();
        assert_eq!(placement.pod_name, "wscli-x-aaa");
        assert_eq!(placement.pod_ip, "10.0.0.5".parse::<IpAddr>().unwrap());
    }
}
