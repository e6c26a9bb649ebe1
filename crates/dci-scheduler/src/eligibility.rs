//! Eligibility of a (remoteci, topic) pair for scheduling.

use std::sync::Arc;

use dci_core::{Caller, Error, ResourceId, Result};
use dci_db::{CatalogRepo, DbError, JobDefinitionRecord, RemoteciRecord};
use tracing::debug;

/// A schedulable combination.
#[derive(Debug, Clone)]
pub struct Eligibility {
    pub remoteci: RemoteciRecord,
    pub jobdefinition: JobDefinitionRecord,
}

pub struct EligibilityChecker {
    catalog: Arc<dyn CatalogRepo>,
}

impl EligibilityChecker {
    pub fn new(catalog: Arc<dyn CatalogRepo>) -> Self {
        Self { catalog }
    }

    /// Validate that `remoteci_id` may run a job of `topic_id` right now and
    /// pick the job definition it will run.
    ///
    /// When a topic has several active job definitions the earliest created
    /// one is selected.
    pub async fn check(
        &self,
        caller: &Caller,
        remoteci_id: ResourceId,
        topic_id: ResourceId,
    ) -> Result<Eligibility> {
        let remoteci = match self.catalog.get_remoteci(remoteci_id).await {
            Ok(remoteci) => remoteci,
            Err(DbError::NotFound(_)) => {
                return Err(Error::PreconditionFailed(format!(
                    "remoteci {} does not exist",
                    remoteci_id
                )));
            }
            Err(e) => return Err(e.into()),
        };
        caller.ensure_team(remoteci.team_id)?;

        if !remoteci.active {
            return Err(Error::PreconditionFailed(format!(
                "remoteci '{}' is not active",
                remoteci.name
            )));
        }

        let topic = self.catalog.get_topic(topic_id).await?;
        if !self
            .catalog
            .topic_has_team(topic_id, ResourceId::from(remoteci.team_id))
            .await?
        {
            return Err(Error::PreconditionFailed(format!(
                "team of remoteci '{}' is not associated with topic '{}'",
                remoteci.name, topic.name
            )));
        }

        let jobdefinition = self
            .catalog
            .list_active_jobdefinitions(topic_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::PreconditionFailed(format!(
                    "no active job definition in topic '{}'",
                    topic.name
                ))
            })?;

        debug!(
            remoteci_id = %remoteci.id,
            jobdefinition_id = %jobdefinition.id,
            "remoteci is eligible"
        );
        Ok(Eligibility {
            remoteci,
            jobdefinition,
        })
    }
}
