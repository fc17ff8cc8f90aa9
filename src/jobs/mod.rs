//! Durable job backlog, workflow run records and the step ledger.
//!
//! `JobDb` owns all SQL; `DbHandle` is the cloneable async wrapper shared by
//! the worker, the CLI and steps.

pub mod db;
pub mod models;

pub use db::{DbHandle, JobDb};
pub use models::{RunStatus, RunStep, StepStatus, WorkflowRun};
