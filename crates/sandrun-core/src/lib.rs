//! Execution orchestrator for running untrusted source code in bounded sandboxes.
//!
//! A caller submits `(code, language, optional stdin)` together with an already
//! resolved identity and tier, and gets back a deterministic result record with
//! captured output, the exit status, timing, and the admission figures it has
//! left. Each run is isolated with ceilings on memory, CPU, process count,
//! network access and wall-clock time.
//!
//! # Architecture Overview
//!
//! - **Language registry**: Immutable table mapping identifiers to sandbox images and commands
//! - **Admission control**: Independent burst (token bucket) and hourly quota (sliding window) gates
//! - **Sandbox runner**: Deadline-bounded runs through a pluggable container launcher
//! - **Mock execution**: Heuristic output for environments without a container runtime
//! - **Orchestrator**: Request lifecycle with guaranteed scratch-directory cleanup
//! - **Configuration system**: YAML configuration with environment overrides

pub mod admission;
pub mod config;
pub mod errors;
pub mod mock;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod runner;
pub mod sandbox;

pub use admission::{AdmissionController, Endpoint};
pub use config::*;
pub use errors::{AdmissionDenied, SandboxError, SandrunError, ValidationError};
pub use model::{resolve_client_ip, CallerIdentity, ExecutionRequest, ExecutionResult, Tier};
pub use orchestrator::Orchestrator;
pub use registry::{LanguageConfig, LanguageRegistry};
pub use runner::Runner;
