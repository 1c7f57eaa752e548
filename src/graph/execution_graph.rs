use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transformation::{Transformation, TransformationId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("No operators defined in the execution graph; build a new graph before executing")]
    Empty,

    #[error("Operator {id} reads from unknown operator {input}")]
    UnknownInput {
        id: TransformationId,
        input: TransformationId,
    },

    #[error("Operator id {0} is used more than once")]
    DuplicateId(TransformationId),

    #[error("Operator {id} has parallelism 0")]
    ZeroParallelism { id: TransformationId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobVertex {
    pub id: TransformationId,
    pub name: String,
    pub operator: String,
    /// `None` leaves the choice to the coordinator
    pub parallelism: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: TransformationId,
    pub target: TransformationId,
}

/// Logical job graph in submission form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    job_id: Uuid,
    job_name: String,
    vertices: Vec<JobVertex>,
    edges: Vec<GraphEdge>,
}

impl ExecutionGraph {
    /// Generate a graph from buffered transformations.
    ///
    /// Vertices without an explicit parallelism get `default_parallelism`.
    /// Every input must name a transformation that appears earlier in the list.
    pub fn from_transformations(
        transformations: &[Transformation],
        default_parallelism: Option<u32>,
    ) -> Result<Self, GraphError> {
        if transformations.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut seen = HashSet::with_capacity(transformations.len());
        let mut vertices = Vec::with_capacity(transformations.len());
        let mut edges = Vec::new();

        for t in transformations {
            if t.parallelism == Some(0) {
                return Err(GraphError::ZeroParallelism { id: t.id });
            }
            for input in &t.inputs {
                if !seen.contains(input) {
                    return Err(GraphError::UnknownInput {
                        id: t.id,
                        input: *input,
                    });
                }
                edges.push(GraphEdge {
                    source: *input,
                    target: t.id,
                });
            }
            if !seen.insert(t.id) {
                return Err(GraphError::DuplicateId(t.id));
            }
            vertices.push(JobVertex {
                id: t.id,
                name: t.name.clone(),
                operator: t.operator.clone(),
                parallelism: t.parallelism.or(default_parallelism),
            });
        }

        Ok(Self {
            job_id: Uuid::new_v4(),
            job_name: String::new(),
            vertices,
            edges,
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn set_job_name(&mut self, name: impl Into<String>) {
        self.job_name = name.into();
    }

    pub fn vertices(&self) -> &[JobVertex] {
        &self.vertices
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn sources(&self) -> impl Iterator<Item = &JobVertex> {
        self.vertices
            .iter()
            .filter(|v| !self.edges.iter().any(|e| e.target == v.id))
    }
}
