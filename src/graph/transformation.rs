use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformationId(pub u32);

impl fmt::Display for TransformationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One operator in the transient graph-construction buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transformation {
    pub id: TransformationId,
    pub name: String,
    /// Operator identifier understood by the workers, e.g. a class name
    pub operator: String,
    #[serde(default)]
    pub parallelism: Option<u32>,
    #[serde(default)]
    pub inputs: Vec<TransformationId>,
}

impl Transformation {
    pub fn new(id: u32, name: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            id: TransformationId(id),
            name: name.into(),
            operator: operator.into(),
            parallelism: None,
            inputs: Vec::new(),
        }
    }

    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    pub fn with_input(mut self, input: TransformationId) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn is_source(&self) -> bool {
        self.inputs.is_empty()
    }
}
