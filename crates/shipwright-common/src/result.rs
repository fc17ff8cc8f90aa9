//! The uniform value every step hands back to the runner.
//!
//! Three independent facets: the outcome (success carrying data, or failure
//! carrying a message), an optional rewind directive, and a free-form
//! metadata side channel. A result can be a success that asks for a rerun
//! just as well as a failure that does.

use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Outcome<T> {
    Success(T),
    Failure(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult<T = ()> {
    outcome: Outcome<T>,
    rerun_from: Option<String>,
    metadata: Map<String, Value>,
}

impl<T> StepResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            outcome: Outcome::Success(data),
            rerun_from: None,
            metadata: Map::new(),
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Failure(error.into()),
            rerun_from: None,
            metadata: Map::new(),
        }
    }

    /// Ask the runner to rewind to `step`. Blank names are ignored.
    pub fn with_rerun_from(mut self, step: impl AsRef<str>) -> Self {
        let step = step.as_ref().trim();
        self.rerun_from = if step.is_empty() {
            None
        } else {
            Some(step.to_string())
        };
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn outcome(&self) -> &Outcome<T> {
        &self.outcome
    }

    pub fn data(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(data) => Some(data),
            Outcome::Failure(_) => None,
        }
    }

    pub fn into_data(self) -> Option<T> {
        match self.outcome {
            Outcome::Success(data) => Some(data),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }

    pub fn rerun_from(&self) -> Option<&str> {
        self.rerun_from.as_deref()
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    /// Replace the success payload, keeping rerun directive and metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StepResult<U> {
        StepResult {
            outcome: match self.outcome {
                Outcome::Success(data) => Outcome::Success(f(data)),
                Outcome::Failure(e) => Outcome::Failure(e),
            },
            rerun_from: self.rerun_from,
            metadata: self.metadata,
        }
    }

    pub fn discard(self) -> StepResult<()> {
        self.map(|_| ())
    }
}

impl StepResult<()> {
    pub fn success() -> Self {
        Self::ok(())
    }
}
