//! Repository traits and implementations.

pub mod catalog;
pub mod file;
pub mod job;
pub mod user;

pub use catalog::{
    CatalogRepo, ComponentRecord, JobDefinitionRecord, PgCatalogRepo, RemoteciRecord, TeamRecord,
    TopicRecord,
};
pub use file::{FileRecord, FileRepo, NewFile, PgFileRepo};
pub use job::{
    JobFilter, JobRecord, JobRepo, JobStateRecord, JobUpdate, NewJob, PgJobRepo, ScheduledJob,
};
pub use user::{PgUserRepo, UserRecord, UserRepo, hash_token};
