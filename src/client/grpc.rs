use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_stream::StreamExt;
use tonic::transport::{Channel, Endpoint};
use uuid::Uuid;

use super::{Coordinator, CoordinatorConnection, SubmissionRequest};
use crate::config::{options, Configuration, TlsConfig};
use crate::error::{BoxError, SubmissionError};
use crate::proto::coordinator_client::CoordinatorClient;
use crate::proto::{
    Artifact, CloseSessionRequest, Descriptor, JobGraph, JobResult, JobState, JobStatusEvent,
    OpenSessionRequest, SubmitJobRequest, WatchJobRequest,
};
use crate::result::ExecutionResult;
use crate::tls::TlsIdentity;
use crate::usercode::UserCodeContext;

/// Connects to a coordinator speaking the `graphdispatch.Coordinator` gRPC service.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcCoordinator;

#[tonic::async_trait]
impl Coordinator for GrpcCoordinator {
    type Connection = GrpcConnection;

    async fn connect(&self, configuration: &Configuration) -> Result<GrpcConnection, BoxError> {
        GrpcConnection::open(configuration).await
    }
}

/// One coordinator session over a tonic channel.
pub struct GrpcConnection {
    client: CoordinatorClient<Channel>,
    uri: String,
    /// `None` once the session has been closed
    session_id: Option<String>,
    print_status: bool,
}

impl GrpcConnection {
    /// Connect the channel and open a session.
    ///
    /// If the session handshake fails the channel is dropped with the error.
    pub async fn open(configuration: &Configuration) -> Result<Self, BoxError> {
        let host = configuration
            .get_string(options::COORDINATOR_ADDRESS)
            .ok_or("coordinator address is not configured")?;
        let port = configuration
            .get_integer(options::COORDINATOR_PORT)?
            .ok_or("coordinator port is not configured")?;

        let tls_config = TlsConfig::from_configuration(configuration)?;
        let tls = if tls_config.enabled {
            Some(TlsIdentity::load(&tls_config).await?)
        } else {
            None
        };

        let scheme = if tls.is_some() { "https" } else { "http" };
        let uri = format!("{}://{}:{}", scheme, host, port);
        let mut endpoint = Endpoint::from_shared(uri.clone())?;
        if let Some(timeout) = configuration.get_duration_ms(options::CONNECT_TIMEOUT_MS)? {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = configuration.get_duration_ms(options::RPC_TIMEOUT_MS)? {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(ref tls) = tls {
            endpoint = endpoint.tls_config(tls.client_tls_config(host))?;
        }

        let channel = endpoint.connect().await?;
        tracing::debug!(uri = %uri, tls = tls.is_some(), "Connected to coordinator");

        let mut client = CoordinatorClient::new(channel);
        let client_id = configuration
            .get_string(options::CLIENT_ID)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let response = client
            .open_session(OpenSessionRequest {
                client_id,
                configuration: configuration
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            })
            .await?
            .into_inner();

        tracing::debug!(session_id = %response.session_id, "Opened coordinator session");
        Ok(Self {
            client,
            uri,
            session_id: Some(response.session_id),
            print_status: false,
        })
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Follow the job's status stream until it reaches a terminal state.
    async fn await_result(
        &mut self,
        session_id: &str,
        job_id: Uuid,
        user_code: &UserCodeContext,
    ) -> Result<ExecutionResult, BoxError> {
        let mut events = self
            .client
            .watch_job(WatchJobRequest {
                session_id: session_id.to_string(),
                job_id: job_id.to_string(),
            })
            .await?
            .into_inner();

        while let Some(event) = events.next().await {
            let event = event?;
            let state = event.state();
            self.report_status(&event, state);

            match state {
                JobState::Finished => {
                    let result = event.result.ok_or_else(|| {
                        format!("coordinator reported job {} FINISHED without a result", job_id)
                    })?;
                    return decode_result(job_id, result, user_code);
                }
                JobState::Failed | JobState::Canceled => {
                    return Err(Box::new(SubmissionError::JobFailed {
                        job_id: job_id.to_string(),
                        state: state.as_str().to_string(),
                        message: event.message,
                    }));
                }
                _ => {}
            }
        }

        Err(format!(
            "status stream for job {} closed before the job reached a terminal state",
            job_id
        )
        .into())
    }

    fn report_status(&self, event: &JobStatusEvent, state: JobState) {
        if self.print_status {
            let at = DateTime::<Utc>::from_timestamp_millis(event.timestamp_ms)
                .unwrap_or_else(Utc::now);
            println!(
                "{}\tJob execution switched to status {}.",
                at.format("%m/%d/%Y %H:%M:%S"),
                state.as_str()
            );
        }
        tracing::debug!(
            job_id = %event.job_id,
            state = state.as_str(),
            message = %event.message,
            "Job status changed"
        );
    }
}

fn decode_result(
    job_id: Uuid,
    result: JobResult,
    user_code: &UserCodeContext,
) -> Result<ExecutionResult, BoxError> {
    let mut accumulators = BTreeMap::new();
    for acc in result.accumulators {
        let value = user_code
            .decode(&acc.name, &acc.type_name, &acc.payload)
            .map_err(SubmissionError::from)?;
        accumulators.insert(acc.name, value);
    }
    Ok(ExecutionResult::new(
        job_id,
        Duration::from_millis(result.net_runtime_ms),
        accumulators,
    ))
}

#[tonic::async_trait]
impl CoordinatorConnection for GrpcConnection {
    fn set_print_status_during_execution(&mut self, enabled: bool) {
        self.print_status = enabled;
    }

    async fn submit(&mut self, request: SubmissionRequest<'_>) -> Result<ExecutionResult, BoxError> {
        let session_id = self
            .session_id
            .clone()
            .ok_or("coordinator session is already closed")?;
        let graph = request.graph;

        let response = self
            .client
            .submit_job(SubmitJobRequest {
                session_id: session_id.clone(),
                graph: Some(JobGraph::from(graph)),
                artifacts: request.artifacts.iter().map(Artifact::from).collect(),
                classpaths: request.classpaths.iter().map(|u| u.to_string()).collect(),
                descriptor: request.descriptor.map(Descriptor::from),
            })
            .await?
            .into_inner();

        if !response.accepted {
            let job_id = if response.job_id.is_empty() {
                graph.job_id().to_string()
            } else {
                response.job_id
            };
            return Err(Box::new(SubmissionError::Rejected {
                job_id,
                message: response.error,
            }));
        }

        // Prefer the id the coordinator assigned
        let job_id = if response.job_id.is_empty() {
            graph.job_id()
        } else {
            Uuid::parse_str(&response.job_id).map_err(|e| {
                format!("coordinator assigned an invalid job id '{}': {}", response.job_id, e)
            })?
        };

        tracing::info!(job_id = %job_id, job_name = graph.job_name(), "Job submitted, waiting for completion");
        self.await_result(&session_id, job_id, request.user_code)
            .await
    }

    async fn shutdown(&mut self) -> Result<(), BoxError> {
        let Some(session_id) = self.session_id.take() else {
            return Ok(());
        };
        self.client
            .close_session(CloseSessionRequest { session_id })
            .await?;
        tracing::debug!(uri = %self.uri, "Closed coordinator session");
        Ok(())
    }
}
