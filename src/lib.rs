pub mod agent;
pub mod artifacts;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod logging;
pub mod process;
pub mod steps;
pub mod util;
pub mod worker;
pub mod workflow;
