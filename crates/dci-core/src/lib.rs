//! Core domain types for the DCI job scheduling service.
//!
//! This crate contains:
//! - Resource identifiers and the error taxonomy
//! - Etag generation for optimistic concurrency
//! - The job status state machine and caller identity
//! - List query parsing (`limit`, `offset`, `sort`, `where`, `embed`)
//! - Embedded resource projection
//! - Configuration search predicates
//! - JUnit report summaries

pub mod caller;
pub mod embed;
pub mod error;
pub mod etag;
pub mod id;
pub mod job;
pub mod junit;
pub mod query;
pub mod search;

pub use caller::{Caller, Role};
pub use error::{Error, Result};
pub use etag::Etag;
pub use id::ResourceId;
pub use job::{AgentMetadata, JobStatus};
