//! Component resolution: the latest active component of each required type.

use std::sync::Arc;

use dci_core::{Error, ResourceId, Result};
use dci_db::{CatalogRepo, ComponentRecord, JobDefinitionRecord};

/// Pick, for each of `component_types`, the candidate with the greatest
/// `created_at`. Among equal timestamps the one later in `candidates` wins.
///
/// The output follows the order of `component_types`. A type without any
/// candidate is reported as `NotFound`.
pub fn select_latest(
    component_types: &[String],
    candidates: &[ComponentRecord],
) -> Result<Vec<ComponentRecord>> {
    let mut selected: Vec<ComponentRecord> = Vec::with_capacity(component_types.len());
    for component_type in component_types {
        if selected.iter().any(|c| &c.component_type == component_type) {
            continue;
        }
        // max_by_key keeps the last of equal maxima.
        let latest = candidates
            .iter()
            .filter(|c| &c.component_type == component_type)
            .max_by_key(|c| c.created_at)
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "no active component of type '{}'",
                    component_type
                ))
            })?;
        selected.push(latest.clone());
    }
    Ok(selected)
}

pub struct ComponentResolver {
    catalog: Arc<dyn CatalogRepo>,
}

impl ComponentResolver {
    pub fn new(catalog: Arc<dyn CatalogRepo>) -> Self {
        Self { catalog }
    }

    /// Resolve the component snapshot for a new job of `jobdefinition`.
    pub async fn resolve(&self, jobdefinition: &JobDefinitionRecord) -> Result<Vec<ComponentRecord>> {
        let candidates = self
            .catalog
            .list_active_components(
                ResourceId::from(jobdefinition.topic_id),
                &jobdefinition.component_types,
            )
            .await?;
        select_latest(&jobdefinition.component_types, &candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Fixture;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_latest_component_wins() {
        let f = Fixture::new();
        let t0 = Utc::now();
        f.store
            .add_component_at(f.topic.id, "type_1", "v1", t0);
        f.store
            .add_component_at(f.topic.id, "type_1", "v3", t0 + Duration::seconds(2));
        f.store
            .add_component_at(f.topic.id, "type_1", "v2", t0 + Duration::seconds(1));
        f.store.add_component(f.topic.id, "type_2", "other");

        let resolver = ComponentResolver::new(f.catalog());
        let components = resolver.resolve(&f.jobdefinition).await.unwrap();

        let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["v3", "other"]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_prefer_last_inserted() {
        let f = Fixture::new();
        let t0 = Utc::now();
        f.store.add_component_at(f.topic.id, "type_1", "first", t0);
        f.store.add_component_at(f.topic.id, "type_1", "second", t0);
        f.store.add_component(f.topic.id, "type_2", "other");

        let resolver = ComponentResolver::new(f.catalog());
        let components = resolver.resolve(&f.jobdefinition).await.unwrap();
        assert_eq!(components[0].name, "second");
    }

    #[tokio::test]
    async fn test_inactive_components_are_ignored() {
        let f = Fixture::new();
        f.store.add_component(f.topic.id, "type_1", "old");
        let newest = f.store.add_component(f.topic.id, "type_1", "new");
        f.store.set_component_active(newest.id, false);
        f.store.add_component(f.topic.id, "type_2", "other");

        let resolver = ComponentResolver::new(f.catalog());
        let components = resolver.resolve(&f.jobdefinition).await.unwrap();
        assert_eq!(components[0].name, "old");
    }

    #[tokio::test]
    async fn test_missing_type_is_not_found() {
        let f = Fixture::new();
        f.store.add_component(f.topic.id, "type_1", "only");

        let resolver = ComponentResolver::new(f.catalog());
        let err = resolver.resolve(&f.jobdefinition).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(msg) if msg.contains("type_2")));
    }
}
