// Domain registry and built-in domains
pub mod domain;

// Artifact pipeline controller
pub mod pipeline;

// Sandboxed code execution
pub mod sandbox;

// Streaming completion clients
pub mod llm;

// Dataset loading, summaries and snapshot history
pub mod dataset;

pub mod artifact;
pub mod codeblock;
pub mod config;
pub mod error;
pub mod outcome;
pub mod partial_json;

pub use config::WorkbenchConfig;
pub use error::{ConfigError, Result, WorkbenchError};
pub use pipeline::Session;
