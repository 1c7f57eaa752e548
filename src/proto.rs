//! Generated messages and stubs for the `graphdispatch.Coordinator` service
//! (`proto/graphdispatch.proto`), plus conversions from domain types.

tonic::include_proto!("graphdispatch");

use crate::artifact::ArtifactLocator;
use crate::graph::ExecutionGraph;
use crate::result::JobDescriptor;

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Finished | JobState::Failed | JobState::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Unspecified => "UNSPECIFIED",
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Finished => "FINISHED",
            JobState::Failed => "FAILED",
            JobState::Canceled => "CANCELED",
        }
    }
}

impl From<&ExecutionGraph> for JobGraph {
    fn from(graph: &ExecutionGraph) -> Self {
        Self {
            job_id: graph.job_id().to_string(),
            job_name: graph.job_name().to_string(),
            vertices: graph
                .vertices()
                .iter()
                .map(|v| JobVertex {
                    id: v.id.0,
                    name: v.name.clone(),
                    operator: v.operator.clone(),
                    parallelism: v.parallelism.unwrap_or(0),
                })
                .collect(),
            edges: graph
                .edges()
                .iter()
                .map(|e| JobEdge {
                    source: e.source.0,
                    target: e.target.0,
                })
                .collect(),
        }
    }
}

impl From<&ArtifactLocator> for Artifact {
    fn from(artifact: &ArtifactLocator) -> Self {
        Self {
            url: artifact.url().to_string(),
            size_bytes: artifact.size_bytes(),
        }
    }
}

impl From<&JobDescriptor> for Descriptor {
    fn from(descriptor: &JobDescriptor) -> Self {
        Self {
            id: descriptor.id.clone(),
            payload: descriptor.payload.clone(),
        }
    }
}
