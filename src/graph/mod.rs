//! Execution graph handed to the coordinator.
//!
//! Graph construction proper happens elsewhere; this module only holds the
//! transient list of [`Transformation`]s a facade accumulates and the
//! [`ExecutionGraph`] value object generated from it at submission time.

pub mod execution_graph;
pub mod transformation;

pub use execution_graph::{ExecutionGraph, GraphEdge, GraphError, JobVertex};
pub use transformation::{Transformation, TransformationId};
