//! Job scheduling and lifecycle engine for DCI.
//!
//! Selects a job definition and component snapshot for a requesting
//! remoteci, supersedes the remoteci's previous live jobs, and serves
//! conditional mutation and structured queries over jobs. Every operation
//! takes the authenticated [`dci_core::Caller`] explicitly.

pub mod eligibility;
pub mod files;
pub mod mutator;
pub mod query;
pub mod resolver;
pub mod scheduler;

#[cfg(test)]
mod testing;

pub use eligibility::{Eligibility, EligibilityChecker};
pub use files::{FileService, FileUpload, JobResult};
pub use mutator::{JobMutator, JobPatch, ReportedState, StateReport};
pub use query::{JobPage, JobQueryService};
pub use resolver::{ComponentResolver, select_latest};
pub use scheduler::{CreateRequest, CreatedJob, JobScheduler, ScheduleRequest};
