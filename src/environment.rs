use std::fmt;

use tokio::sync::mpsc::UnboundedSender;
use url::Url;

use crate::client::{Coordinator, GrpcCoordinator, RemoteSubmissionClient};
use crate::config::{Configuration, ConnectionParams};
use crate::error::{CleanupWarning, ConstructionError, Result};
use crate::graph::{ExecutionGraph, Transformation, TransformationId};
use crate::result::{ExecutionResult, JobDescriptor};

/// Entry point for running graphs on a remote coordinator.
///
/// Operators are collected in a transient buffer. Every `execute` call turns
/// the buffer into an [`ExecutionGraph`], clears it (whether or not the
/// submission succeeds) and hands the graph to the submission client. A
/// second `execute` without adding operators fails with
/// [`GraphError::Empty`](crate::graph::GraphError::Empty).
pub struct RemoteEnvironment<C: Coordinator = GrpcCoordinator> {
    client: RemoteSubmissionClient<C>,
    transformations: Vec<Transformation>,
    next_id: u32,
    parallelism: Option<u32>,
}

impl RemoteEnvironment<GrpcCoordinator> {
    /// Environment for the coordinator at `host:port`, shipping `jar_files` with every job.
    pub fn new<S: AsRef<str>>(host: impl Into<String>, port: u32, jar_files: &[S]) -> Result<Self> {
        Self::with_coordinator(GrpcCoordinator, host, port, None, jar_files, None)
    }

    pub fn with_configuration<S: AsRef<str>>(
        host: impl Into<String>,
        port: u32,
        configuration: Configuration,
        jar_files: &[S],
    ) -> Result<Self> {
        Self::with_coordinator(
            GrpcCoordinator,
            host,
            port,
            Some(configuration),
            jar_files,
            None,
        )
    }
}

impl<C: Coordinator> RemoteEnvironment<C> {
    /// Full constructor.
    ///
    /// `classpaths` must be reachable from every node in the cluster, e.g.
    /// `file://` paths on a shared mount.
    pub fn with_coordinator<S: AsRef<str>>(
        coordinator: C,
        host: impl Into<String>,
        port: u32,
        configuration: Option<Configuration>,
        jar_files: &[S],
        classpaths: Option<Vec<Url>>,
    ) -> Result<Self> {
        let params = ConnectionParams::new(host, port, configuration)?;
        let mut client = RemoteSubmissionClient::new(coordinator, params, jar_files, classpaths)?;
        client.set_print_status_during_execution(true);
        Ok(Self::from_client(client))
    }

    /// Wrap a prepared client, keeping its print-status setting.
    pub fn from_client(client: RemoteSubmissionClient<C>) -> Self {
        let parallelism = client.params().default_parallelism();
        Self {
            client,
            transformations: Vec::new(),
            next_id: 1,
            parallelism,
        }
    }

    /// Append an operator to the buffer. The returned id can be used as input
    /// for later operators.
    pub fn add_operator(
        &mut self,
        name: impl Into<String>,
        operator: impl Into<String>,
        inputs: &[TransformationId],
    ) -> TransformationId {
        let mut transformation = Transformation::new(self.next_id, name, operator);
        transformation.inputs = inputs.to_vec();
        self.add_transformation(transformation)
    }

    /// Append a prepared transformation, keeping its id.
    pub fn add_transformation(&mut self, transformation: Transformation) -> TransformationId {
        let id = transformation.id;
        self.next_id = self.next_id.max(id.0.saturating_add(1));
        self.transformations.push(transformation);
        id
    }

    pub fn transformations(&self) -> &[Transformation] {
        &self.transformations
    }

    /// Default parallelism for operators without their own. `None` leaves it to the coordinator.
    pub fn parallelism(&self) -> Option<u32> {
        self.parallelism
    }

    pub fn set_parallelism(&mut self, parallelism: i32) -> std::result::Result<&mut Self, ConstructionError> {
        if parallelism < 1 {
            return Err(ConstructionError::InvalidParallelism(i64::from(parallelism)));
        }
        self.parallelism = Some(parallelism as u32);
        Ok(self)
    }

    pub fn enable_sysout_logging(&mut self) -> &mut Self {
        self.client.set_print_status_during_execution(true);
        self
    }

    pub fn disable_sysout_logging(&mut self) -> &mut Self {
        self.client.set_print_status_during_execution(false);
        self
    }

    pub fn is_sysout_logging_enabled(&self) -> bool {
        self.client.print_status_during_execution()
    }

    pub fn set_warning_sink(&mut self, sink: UnboundedSender<CleanupWarning>) -> &mut Self {
        self.client.set_warning_sink(sink);
        self
    }

    pub fn host(&self) -> &str {
        self.client.target().host()
    }

    pub fn port(&self) -> u16 {
        self.client.target().port()
    }

    /// The configuration as supplied at construction.
    pub fn client_configuration(&self) -> &Configuration {
        self.client.params().base_configuration()
    }

    /// The configuration a connection is opened with.
    pub fn effective_configuration(&self) -> Configuration {
        self.client.params().effective_configuration()
    }

    pub fn client(&self) -> &RemoteSubmissionClient<C> {
        &self.client
    }

    pub async fn execute(&mut self, job_name: &str) -> Result<ExecutionResult> {
        self.execute_graph(job_name, None).await
    }

    /// Like [`execute`](Self::execute), attaching a descriptor the coordinator
    /// can use to correlate the job with an external record.
    pub async fn execute_with_descriptor(
        &mut self,
        job_name: &str,
        descriptor: &JobDescriptor,
    ) -> Result<ExecutionResult> {
        self.execute_graph(job_name, Some(descriptor)).await
    }

    async fn execute_graph(
        &mut self,
        job_name: &str,
        descriptor: Option<&JobDescriptor>,
    ) -> Result<ExecutionResult> {
        let transformations = std::mem::take(&mut self.transformations);
        let mut graph = ExecutionGraph::from_transformations(&transformations, self.parallelism)?;
        graph.set_job_name(job_name);
        self.client.submit(graph, descriptor).await
    }
}

impl<C: Coordinator> fmt::Display for RemoteEnvironment<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Remote Environment ({} - parallelism = ", self.client.target())?;
        match self.parallelism {
            Some(p) => write!(f, "{})", p),
            None => write!(f, "default)"),
        }
    }
}
