//! Remote submission of execution graphs.
//!
//! A [`RemoteSubmissionClient`] opens a fresh coordinator connection for
//! every submission and always shuts it down again, whatever the outcome.
//!
//! # Submission flow
//!
//! 1. Build the [`UserCodeContext`] from artifacts and classpaths
//! 2. Merge the base configuration with the coordinator address and port
//! 3. [`Coordinator::connect`] (failure here is a connection error)
//! 4. [`CoordinatorConnection::submit`] and wait for the job to finish
//! 5. Shut the connection down; a failed shutdown is only reported

pub mod grpc;

use std::ops::{Deref, DerefMut};

use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::artifact::{resolve_artifacts, ArtifactLocator};
use crate::config::{Configuration, ConnectionParams, ConnectionTarget};
use crate::error::{BoxError, CleanupWarning, ClientError, ConstructionError, Result, SubmissionError};
use crate::graph::ExecutionGraph;
use crate::result::{ExecutionResult, JobDescriptor};
use crate::usercode::{TypeRegistry, UserCodeContext};

pub use grpc::{GrpcConnection, GrpcCoordinator};

/// Everything a connection needs to run one job.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionRequest<'a> {
    pub graph: &'a ExecutionGraph,
    pub artifacts: &'a [ArtifactLocator],
    pub classpaths: &'a [Url],
    pub user_code: &'a UserCodeContext,
    pub descriptor: Option<&'a JobDescriptor>,
}

/// Factory for coordinator connections.
#[tonic::async_trait]
pub trait Coordinator: Send + Sync {
    type Connection: CoordinatorConnection + 'static;

    /// Establish a connection. Anything set up before a failure must be
    /// released by the implementation.
    async fn connect(&self, configuration: &Configuration) -> std::result::Result<Self::Connection, BoxError>;
}

#[tonic::async_trait]
pub trait CoordinatorConnection: Send {
    fn set_print_status_during_execution(&mut self, _enabled: bool) {}

    /// Dispatch the job and wait until the coordinator reports a terminal state.
    ///
    /// Return a boxed [`SubmissionError`] to have it propagated unchanged;
    /// any other error is wrapped as an execution failure.
    async fn submit(&mut self, request: SubmissionRequest<'_>) -> std::result::Result<ExecutionResult, BoxError>;

    async fn shutdown(&mut self) -> std::result::Result<(), BoxError>;
}

/// Owns an open connection until it is released.
///
/// [`release`](Self::release) performs the shutdown. If the guard is dropped
/// first (the submit future was dropped mid-flight), the shutdown is spawned
/// on the current runtime instead.
pub struct ConnectionGuard<T: CoordinatorConnection + 'static> {
    connection: Option<T>,
    target: ConnectionTarget,
    warnings: Option<UnboundedSender<CleanupWarning>>,
}

impl<T: CoordinatorConnection + 'static> ConnectionGuard<T> {
    pub fn new(
        connection: T,
        target: ConnectionTarget,
        warnings: Option<UnboundedSender<CleanupWarning>>,
    ) -> Self {
        Self {
            connection: Some(connection),
            target,
            warnings,
        }
    }

    pub async fn release(mut self) {
        if let Some(mut connection) = self.connection.take() {
            match connection.shutdown().await {
                Ok(()) => tracing::debug!(coordinator = %self.target, "Connection shut down"),
                Err(e) => report_cleanup_failure(&self.target, self.warnings.as_ref(), e),
            }
        }
    }
}

impl<T: CoordinatorConnection + 'static> Deref for ConnectionGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Only `release` and `drop` take the connection, and both consume the guard.
        self.connection
            .as_ref()
            .expect("connection is present until the guard is released")
    }
}

impl<T: CoordinatorConnection + 'static> DerefMut for ConnectionGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.connection
            .as_mut()
            .expect("connection is present until the guard is released")
    }
}

impl<T: CoordinatorConnection + 'static> Drop for ConnectionGuard<T> {
    fn drop(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        let target = self.target.clone();
        let warnings = self.warnings.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                tracing::debug!(coordinator = %target, "Guard dropped, shutting connection down in background");
                handle.spawn(async move {
                    if let Err(e) = connection.shutdown().await {
                        report_cleanup_failure(&target, warnings.as_ref(), e);
                    }
                });
            }
            Err(_) => {
                let warning = CleanupWarning {
                    target,
                    message: "connection dropped outside a runtime, shutdown skipped".to_string(),
                };
                tracing::warn!(coordinator = %warning.target, "{}", warning.message);
                if let Some(sink) = warnings {
                    let _ = sink.send(warning);
                }
            }
        }
    }
}

fn report_cleanup_failure(
    target: &ConnectionTarget,
    sink: Option<&UnboundedSender<CleanupWarning>>,
    error: BoxError,
) {
    tracing::warn!(coordinator = %target, error = %error, "Failed to shut down coordinator connection");
    if let Some(sink) = sink {
        // Receiver may be gone; the log record above is enough then.
        let _ = sink.send(CleanupWarning {
            target: target.clone(),
            message: error.to_string(),
        });
    }
}

/// Typed submission errors pass through, everything else is wrapped.
///
/// Anything failing after the connection is up is a submission failure, so a
/// boxed [`ClientError`] is wrapped like any other cause.
fn classify_dispatch_error(error: BoxError) -> ClientError {
    match error.downcast::<SubmissionError>() {
        Ok(typed) => ClientError::Submission(*typed),
        Err(other) => ClientError::Submission(SubmissionError::execution_failed(other)),
    }
}

/// Submits execution graphs to one coordinator.
///
/// Immutable once built; every [`submit`](Self::submit) gets its own
/// connection, so one client can serve concurrent submissions.
pub struct RemoteSubmissionClient<C> {
    coordinator: C,
    params: ConnectionParams,
    artifacts: Vec<ArtifactLocator>,
    classpaths: Vec<Url>,
    types: TypeRegistry,
    print_status: bool,
    warnings: Option<UnboundedSender<CleanupWarning>>,
}

impl<C: Coordinator> RemoteSubmissionClient<C> {
    /// Resolve artifacts up front. A bad artifact fails construction.
    pub fn new<S: AsRef<str>>(
        coordinator: C,
        params: ConnectionParams,
        artifact_paths: &[S],
        classpaths: Option<Vec<Url>>,
    ) -> std::result::Result<Self, ConstructionError> {
        let artifacts = resolve_artifacts(artifact_paths)?;
        Ok(Self {
            coordinator,
            params,
            artifacts,
            classpaths: classpaths.unwrap_or_default(),
            types: TypeRegistry::builtin(),
            print_status: false,
            warnings: None,
        })
    }

    pub fn with_type_registry(mut self, types: TypeRegistry) -> Self {
        self.types = types;
        self
    }

    /// Receive a [`CleanupWarning`] for every failed connection shutdown.
    pub fn with_warning_sink(mut self, sink: UnboundedSender<CleanupWarning>) -> Self {
        self.warnings = Some(sink);
        self
    }

    pub fn set_warning_sink(&mut self, sink: UnboundedSender<CleanupWarning>) {
        self.warnings = Some(sink);
    }

    pub fn set_print_status_during_execution(&mut self, enabled: bool) {
        self.print_status = enabled;
    }

    pub fn print_status_during_execution(&self) -> bool {
        self.print_status
    }

    pub fn target(&self) -> &ConnectionTarget {
        self.params.target()
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub fn artifacts(&self) -> &[ArtifactLocator] {
        &self.artifacts
    }

    pub fn classpaths(&self) -> &[Url] {
        &self.classpaths
    }

    pub fn coordinator(&self) -> &C {
        &self.coordinator
    }

    /// Submit `graph` with the client's own artifacts.
    pub async fn submit(
        &self,
        graph: ExecutionGraph,
        descriptor: Option<&JobDescriptor>,
    ) -> Result<ExecutionResult> {
        self.submit_with_artifacts(graph, &self.artifacts, descriptor)
            .await
    }

    /// Opening bundles is blocking file I/O, so it runs off the async workers.
    async fn build_user_code(&self, artifacts: &[ArtifactLocator]) -> Result<UserCodeContext> {
        let artifacts = artifacts.to_vec();
        let classpaths = self.classpaths.clone();
        let types = self.types.clone();
        let user_code = tokio::task::spawn_blocking(move || {
            UserCodeContext::build(&artifacts, &classpaths, &types)
        })
        .await
        .map_err(|e| SubmissionError::execution_failed(Box::new(e)))?
        .map_err(SubmissionError::from)?;
        Ok(user_code)
    }

    pub async fn submit_with_artifacts(
        &self,
        graph: ExecutionGraph,
        artifacts: &[ArtifactLocator],
        descriptor: Option<&JobDescriptor>,
    ) -> Result<ExecutionResult> {
        let target = self.params.target();
        tracing::info!(
            host = target.host(),
            port = target.port(),
            job_name = graph.job_name(),
            job_id = %graph.job_id(),
            artifacts = artifacts.len(),
            descriptor = ?descriptor.map(|d| d.id.as_str()),
            "Running remotely"
        );

        let user_code = self.build_user_code(artifacts).await?;
        let configuration = self.params.effective_configuration();

        let connection = self
            .coordinator
            .connect(&configuration)
            .await
            .map_err(|source| ClientError::Connection {
                target: target.clone(),
                source,
            })?;
        let mut connection = ConnectionGuard::new(connection, target.clone(), self.warnings.clone());
        connection.set_print_status_during_execution(self.print_status);

        let request = SubmissionRequest {
            graph: &graph,
            artifacts,
            classpaths: &self.classpaths,
            user_code: &user_code,
            descriptor,
        };
        let outcome = connection
            .submit(request)
            .await
            .map_err(classify_dispatch_error);

        connection.release().await;

        match &outcome {
            Ok(result) => tracing::info!(
                job_id = %result.job_id(),
                net_runtime_ms = result.net_runtime().as_millis() as u64,
                "Job finished"
            ),
            Err(e) => tracing::error!(job_name = graph.job_name(), error = %e, "Job submission failed"),
        }
        outcome
    }
}
