//! Application state.

use std::sync::Arc;

use dci_db::{
    CatalogRepo, FileRepo, JobRepo, PgCatalogRepo, PgFileRepo, PgJobRepo, PgUserRepo, UserRepo,
};
use dci_scheduler::{FileService, JobMutator, JobQueryService, JobScheduler};
use sqlx::PgPool;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogRepo>,
    pub users: Arc<dyn UserRepo>,
    pub scheduler: Arc<JobScheduler>,
    pub mutator: Arc<JobMutator>,
    pub query: Arc<JobQueryService>,
    pub files: Arc<FileService>,
}

impl AppState {
    pub fn new(
        catalog: Arc<dyn CatalogRepo>,
        jobs: Arc<dyn JobRepo>,
        files: Arc<dyn FileRepo>,
        users: Arc<dyn UserRepo>,
    ) -> Self {
        Self {
            scheduler: Arc::new(JobScheduler::new(catalog.clone(), jobs.clone())),
            mutator: Arc::new(JobMutator::new(jobs.clone())),
            query: Arc::new(JobQueryService::new(
                catalog.clone(),
                jobs.clone(),
                files.clone(),
            )),
            files: Arc::new(FileService::new(jobs, files)),
            catalog,
            users,
        }
    }

    /// State backed by PostgreSQL.
    pub fn postgres(pool: PgPool) -> Self {
        Self::new(
            Arc::new(PgCatalogRepo::new(pool.clone())),
            Arc::new(PgJobRepo::new(pool.clone())),
            Arc::new(PgFileRepo::new(pool.clone())),
            Arc::new(PgUserRepo::new(pool)),
        )
    }

    /// State backed by one store implementing every repository.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: CatalogRepo + JobRepo + FileRepo + UserRepo + 'static,
    {
        Self::new(store.clone(), store.clone(), store.clone(), store)
    }
}
