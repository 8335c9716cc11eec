//! Artifact pipeline
//!
//! - **session**: the [`Session`] controller and its per-artifact state machine
//! - **generate**: generation requests and incremental artifact parsing
//! - **synthesize**: the cross-artifact synthesis request
//! - **batch**: bounded concurrency for "run all"

pub mod batch;
pub mod generate;
pub mod session;
pub mod synthesize;

pub use session::Session;
