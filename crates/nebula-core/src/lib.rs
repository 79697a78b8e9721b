//! Core types for the nebula file-operation engine.
//!
//! This crate provides the data structures shared by the scanner, the
//! operation engine and the CLI: operation snapshots, identifiers,
//! configuration and the error type.

mod config;
mod error;
mod operation;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use error::{OpsError, OpsResult};
pub use operation::{JobStatus, Operation, OperationId, OperationKind};
