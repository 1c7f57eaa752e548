use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Decoded accumulator value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AccumulatorValue {
    Long(i64),
    Double(f64),
    Text(String),
    Bool(bool),
    Json(serde_json::Value),
    /// A job-specific type exported by one of the artifacts
    Custom {
        type_name: String,
        origin: Url,
        value: serde_json::Value,
    },
}

impl fmt::Display for AccumulatorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccumulatorValue::Long(v) => write!(f, "{}", v),
            AccumulatorValue::Double(v) => write!(f, "{}", v),
            AccumulatorValue::Text(v) => write!(f, "{}", v),
            AccumulatorValue::Bool(v) => write!(f, "{}", v),
            AccumulatorValue::Json(v) => write!(f, "{}", v),
            AccumulatorValue::Custom {
                type_name, value, ..
            } => write!(f, "{} {}", type_name, value),
        }
    }
}

/// Outcome of a successful job: elapsed time and named accumulators.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    job_id: Uuid,
    net_runtime: Duration,
    accumulators: BTreeMap<String, AccumulatorValue>,
}

impl ExecutionResult {
    pub fn new(
        job_id: Uuid,
        net_runtime: Duration,
        accumulators: BTreeMap<String, AccumulatorValue>,
    ) -> Self {
        Self {
            job_id,
            net_runtime,
            accumulators,
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn net_runtime(&self) -> Duration {
        self.net_runtime
    }

    pub fn accumulator(&self, name: &str) -> Option<&AccumulatorValue> {
        self.accumulators.get(name)
    }

    pub fn all_accumulator_results(&self) -> &BTreeMap<String, AccumulatorValue> {
        &self.accumulators
    }
}

/// Opaque record correlating a submission with an external tracking system.
///
/// Passed to the coordinator as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub payload: Vec<u8>,
}

impl JobDescriptor {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }

    /// Descriptor whose payload is the JSON encoding of `record`.
    pub fn from_json<T: Serialize>(
        id: impl Into<String>,
        record: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self::new(id, serde_json::to_vec(record)?))
    }
}
