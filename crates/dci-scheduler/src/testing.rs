//! Seeded in-memory fixtures shared by the engine tests.

use std::sync::Arc;

use dci_core::{AgentMetadata, Caller, Role};
use dci_db::{
    CatalogRepo, FileRepo, JobDefinitionRecord, JobRepo, MemoryStore, RemoteciRecord, TeamRecord,
    TopicRecord, UserRecord,
};

use crate::{FileService, JobMutator, JobQueryService, JobScheduler, ScheduleRequest};

pub struct Fixture {
    pub store: Arc<MemoryStore>,
    pub team: TeamRecord,
    pub topic: TopicRecord,
    pub remoteci: RemoteciRecord,
    pub jobdefinition: JobDefinitionRecord,
    pub user: Caller,
    pub stranger: Caller,
    pub super_admin: Caller,
}

fn caller(user: &UserRecord) -> Caller {
    Caller {
        user_id: user.id,
        team_id: user.team_id,
        role: Role::parse(&user.role).unwrap(),
    }
}

impl Fixture {
    /// A team in topic `OSP` with one remoteci and a job definition
    /// requiring `type_1` and `type_2`. No components yet.
    pub fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let team = store.add_team("ops");
        let other_team = store.add_team("qa");
        let admin_team = store.add_team("admin");
        let topic = store.add_topic("OSP");
        store.add_team_to_topic(topic.id, team.id);
        let remoteci = store.add_remoteci(team.id, "rack-1");
        let jobdefinition = store.add_jobdefinition(topic.id, "smoke", &["type_1", "type_2"]);

        let user = caller(&store.add_user("user", team.id, Role::User, "user-token"));
        let stranger = caller(&store.add_user("stranger", other_team.id, Role::User, "qa-token"));
        let super_admin = caller(&store.add_user(
            "admin",
            admin_team.id,
            Role::SuperAdmin,
            "admin-token",
        ));

        Self {
            store,
            team,
            topic,
            remoteci,
            jobdefinition,
            user,
            stranger,
            super_admin,
        }
    }

    /// Like [`Fixture::new`], with one component of each required type.
    pub fn with_components() -> Self {
        let f = Self::new();
        f.store.add_component(f.topic.id, "type_1", "type_1-1.0");
        f.store.add_component(f.topic.id, "type_2", "type_2-1.0");
        f
    }

    pub fn catalog(&self) -> Arc<dyn CatalogRepo> {
        self.store.clone()
    }

    pub fn jobs(&self) -> Arc<dyn JobRepo> {
        self.store.clone()
    }

    pub fn files(&self) -> Arc<dyn FileRepo> {
        self.store.clone()
    }

    pub fn scheduler(&self) -> JobScheduler {
        JobScheduler::new(self.catalog(), self.jobs())
    }

    pub fn mutator(&self) -> JobMutator {
        JobMutator::new(self.jobs())
    }

    pub fn query(&self) -> JobQueryService {
        JobQueryService::new(self.catalog(), self.jobs(), self.files())
    }

    pub fn file_service(&self) -> FileService {
        FileService::new(self.jobs(), self.files())
    }

    pub fn schedule_request(&self) -> ScheduleRequest {
        ScheduleRequest {
            remoteci_id: self.remoteci.id.into(),
            topic_id: self.topic.id.into(),
            agent: AgentMetadata {
                user_agent: Some("python-dciclient".to_string()),
                client_version: Some("python-dciclient_0.1.0".to_string()),
            },
        }
    }
}
