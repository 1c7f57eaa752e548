pub mod artifact;
pub mod client;
pub mod config;
pub mod environment;
pub mod error;
pub mod graph;
pub mod proto;
pub mod result;
pub mod tls;
pub mod usercode;

pub use client::{Coordinator, CoordinatorConnection, RemoteSubmissionClient, SubmissionRequest};
pub use config::{Configuration, ConnectionParams, ConnectionTarget};
pub use environment::RemoteEnvironment;
pub use error::{BoxError, CleanupWarning, ClientError, ConstructionError, ErrorKind, SubmissionError};
pub use result::{AccumulatorValue, ExecutionResult, JobDescriptor};
