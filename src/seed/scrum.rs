use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use log::info;
use std::sync::Arc;

use crate::dispatch::{read_only_handler, HandlerDescriptor, StaticHandlerDiscovery};
use crate::model::{ContainerMetadata, EntityRecord, KeyKind, KeyScalar, KeyValue, RuntimeType};
use crate::store::{ContextSchema, EntitySetSpec, EntityTypeSpec, MemoryStore};

pub const SCRUM_CONTEXT: &str = "Scrum.Dal.ScrumDb";
pub const SCRUM_NAMESPACE: &str = "Scrum";

/// Entity sets whose handlers come from discovery rather than registration
pub const LOOKUP_SETS: [&str; 2] = ["Priority", "Status"];

const PRIORITIES: [(i64, &str); 4] = [(1, "Low"), (2, "Normal"), (3, "High"), (4, "Critical")];
const STATUSES: [(i64, &str); 4] = [(1, "Open"), (2, "Active"), (3, "Resolved"), (4, "Closed")];

fn model(name: &str) -> String {
    format!("Scrum.Model.{}", name)
}

fn entity(type_name: &str) -> EntityTypeSpec {
    EntityTypeSpec::new(type_name, &model(type_name))
}

fn record(type_name: &str) -> EntityRecord {
    EntityRecord::new(RuntimeType::new(model(type_name)))
}

fn id(value: i64) -> KeyValue {
    KeyValue::Single(KeyScalar::Int(value))
}

/// Schema of the Scrum data context.
pub fn scrum_schema() -> ContextSchema {
    ContextSchema::new(SCRUM_CONTEXT, SCRUM_NAMESPACE)
        .entity_type(
            entity("Client")
                .key("Id", KeyKind::Int32)
                .property("Name", "Edm.String")
                .navigation("Projects", "Project", true),
        )
        .entity_type(
            entity("Project")
                .key("Id", KeyKind::Int32)
                .property("Name", "Edm.String")
                .property("ClientId", "Edm.Int32")
                .navigation("Client", "Client", false)
                .navigation("Owners", "User", true)
                .navigation("Areas", "ProjectArea", true)
                .navigation("Versions", "ProjectVersion", true),
        )
        .entity_type(
            entity("ProjectArea")
                .key("Id", KeyKind::Int32)
                .property("Name", "Edm.String")
                .property("ProjectId", "Edm.Int32"),
        )
        .entity_type(
            entity("ProjectVersion")
                .key("Id", KeyKind::Int32)
                .property("Name", "Edm.String")
                .property("ProjectId", "Edm.Int32"),
        )
        .entity_type(
            entity("Sprint")
                .key("Id", KeyKind::Int32)
                .property("Name", "Edm.String")
                .property("StartDate", "Edm.DateTimeOffset")
                .property("EndDate", "Edm.DateTimeOffset")
                .navigation("WorkItems", "WorkItem", true),
        )
        .entity_type(
            entity("User")
                .key("Id", KeyKind::Int32)
                .property("UserName", "Edm.String")
                .property("Email", "Edm.String"),
        )
        .entity_type(
            entity("WorkItem")
                .key("Id", KeyKind::Int32)
                .property("Title", "Edm.String")
                .property("Description", "Edm.String")
                .property("PriorityId", "Edm.Int32")
                .property("StatusId", "Edm.Int32")
                .navigation("AssignedTo", "User", false)
                .navigation("Messages", "WorkItemMessage", true)
                .navigation("PropertyChanges", "WorkItemPropertyChange", true)
                .navigation("TimeLog", "WorkItemTimeLog", true),
        )
        .entity_type(
            entity("Bug")
                .derives_from("WorkItem")
                .property("ReproSteps", "Edm.String")
                .navigation("FoundBy", "User", false),
        )
        .entity_type(
            entity("Story")
                .derives_from("WorkItem")
                .property("StoryPoints", "Edm.Int32"),
        )
        .entity_type(
            entity("WorkItemMessage")
                .key("Id", KeyKind::Int32)
                .property("Message", "Edm.String")
                .property("AuthorId", "Edm.Int32"),
        )
        .entity_type(
            entity("WorkItemPropertyChange")
                .key("Id", KeyKind::Int32)
                .property("Property", "Edm.String")
                .property("OldValue", "Edm.String")
                .property("NewValue", "Edm.String"),
        )
        .entity_type(
            entity("WorkItemTimeLog")
                .key("Id", KeyKind::Int32)
                .property("Hours", "Edm.Decimal")
                .property("LoggedAt", "Edm.DateTimeOffset"),
        )
        .entity_type(entity("Priority").key("Id", KeyKind::Int32).property("Name", "Edm.String"))
        .entity_type(entity("Status").key("Id", KeyKind::Int32).property("Name", "Edm.String"))
        .entity_set(EntitySetSpec::new("Clients", "Client").target("Projects", "Projects"))
        .entity_set(
            EntitySetSpec::new("Projects", "Project")
                .target("Client", "Clients")
                .target("Owners", "Users")
                .target("Areas", "ProjectAreas")
                .target("Versions", "ProjectVersions"),
        )
        .entity_set(EntitySetSpec::new("ProjectAreas", "ProjectArea"))
        .entity_set(EntitySetSpec::new("ProjectVersions", "ProjectVersion"))
        .entity_set(EntitySetSpec::new("Sprints", "Sprint").target("WorkItems", "WorkItems"))
        .entity_set(EntitySetSpec::new("Users", "User"))
        .entity_set(
            EntitySetSpec::new("WorkItems", "WorkItem")
                .target("AssignedTo", "Users")
                .target("Messages", "WorkItemMessages")
                .target("PropertyChanges", "WorkItemPropertyChanges")
                .target("TimeLog", "WorkItemTimeLog")
                .target("FoundBy", "Users"),
        )
        .entity_set(EntitySetSpec::new("WorkItemMessages", "WorkItemMessage"))
        .entity_set(EntitySetSpec::new("WorkItemPropertyChanges", "WorkItemPropertyChange"))
        .entity_set(EntitySetSpec::new("WorkItemTimeLog", "WorkItemTimeLog"))
        .entity_set(EntitySetSpec::new("Priority", "Priority"))
        .entity_set(EntitySetSpec::new("Status", "Status"))
}

/// The Scrum data context, optionally filled with demo data.
pub fn scrum_store(load_seed: bool) -> Result<MemoryStore> {
    let store = MemoryStore::new(scrum_schema());
    load_lookup_values(&store)?;
    if load_seed {
        load_seed_data(&store).context("Failed to load Scrum seed data")?;
    }
    Ok(store)
}

/// Priority and status values exist in every Scrum database.
fn load_lookup_values(store: &MemoryStore) -> Result<()> {
    for (value, name) in PRIORITIES {
        store.seed("Priority", record("Priority").with("Id", value).with("Name", name))?;
    }
    for (value, name) in STATUSES {
        store.seed("Status", record("Status").with("Id", value).with("Name", name))?;
    }
    Ok(())
}

pub fn load_seed_data(store: &MemoryStore) -> Result<()> {
    store.seed("Clients", record("Client").with("Id", 1).with("Name", "Contoso"))?;

    for (user_id, user_name) in [(1, "alice"), (2, "bob"), (3, "carol")] {
        store.seed(
            "Users",
            record("User")
                .with("Id", user_id)
                .with("UserName", user_name)
                .with("Email", format!("{}@contoso.example", user_name)),
        )?;
    }

    for (project_id, name) in [(1, "Website"), (2, "Mobile App")] {
        store.seed(
            "Projects",
            record("Project")
                .with("Id", project_id)
                .with("Name", name)
                .with("ClientId", 1),
        )?;
        store.seed_link("Clients", id(1), "Projects", id(project_id))?;
        store.seed_link("Projects", id(project_id), "Client", id(1))?;
    }
    store.seed_link("Projects", id(1), "Owners", id(1))?;
    store.seed_link("Projects", id(1), "Owners", id(2))?;
    store.seed_link("Projects", id(2), "Owners", id(3))?;

    store.seed(
        "ProjectAreas",
        record("ProjectArea").with("Id", 1).with("Name", "Checkout").with("ProjectId", 1),
    )?;
    store.seed_link("Projects", id(1), "Areas", id(1))?;
    store.seed(
        "ProjectVersions",
        record("ProjectVersion").with("Id", 1).with("Name", "1.0").with("ProjectId", 1),
    )?;
    store.seed_link("Projects", id(1), "Versions", id(1))?;

    let sprint_start = Utc
        .with_ymd_and_hms(2013, 3, 4, 9, 0, 0)
        .single()
        .context("Invalid sprint start date")?;
    store.seed(
        "Sprints",
        record("Sprint")
            .with("Id", 1)
            .with("Name", "Sprint 1")
            .with("StartDate", sprint_start.to_rfc3339())
            .with("EndDate", (sprint_start + Duration::days(14)).to_rfc3339()),
    )?;

    store.seed(
        "WorkItems",
        record("Bug")
            .with("Id", 1)
            .with("Title", "Checkout button does nothing")
            .with("PriorityId", 3)
            .with("StatusId", 1)
            .with("ReproSteps", "Add an item, press checkout"),
    )?;
    store.seed(
        "WorkItems",
        record("Story")
            .with("Id", 2)
            .with("Title", "Pay with a saved card")
            .with("PriorityId", 2)
            .with("StatusId", 2)
            .with("StoryPoints", 5),
    )?;
    store.seed_link("WorkItems", id(1), "FoundBy", id(3))?;
    store.seed_link("WorkItems", id(1), "AssignedTo", id(1))?;
    store.seed_link("WorkItems", id(2), "AssignedTo", id(2))?;
    store.seed_link("Sprints", id(1), "WorkItems", id(1))?;
    store.seed_link("Sprints", id(1), "WorkItems", id(2))?;

    store.seed(
        "WorkItemMessages",
        record("WorkItemMessage")
            .with("Id", 1)
            .with("Message", "Reproduced on staging")
            .with("AuthorId", 1),
    )?;
    store.seed_link("WorkItems", id(1), "Messages", id(1))?;

    store.seed(
        "WorkItemTimeLog",
        record("WorkItemTimeLog")
            .with("Id", 1)
            .with("Hours", 1.5)
            .with("LoggedAt", (sprint_start + Duration::days(1)).to_rfc3339()),
    )?;
    store.seed_link("WorkItems", id(1), "TimeLog", id(1))?;

    info!("Loaded Scrum seed data");
    Ok(())
}

/// Read-only handlers for the lookup sets, found by discovery instead of registration.
pub fn lookup_discovery(container: Arc<ContainerMetadata>) -> StaticHandlerDiscovery {
    StaticHandlerDiscovery::new(move || {
        LOOKUP_SETS
            .iter()
            .map(|name| HandlerDescriptor::new(name, read_only_handler(), Some(container.clone())))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::HandlerDiscovery;
    use crate::logic::container_builder::build_container;
    use crate::store::EntityStore;

    #[test]
    fn test_scrum_container_builds() {
        let store = scrum_store(false).unwrap();
        let container = build_container(&store).unwrap();

        assert_eq!(container.entity_sets().len(), 12);
        let work_items = container.get_entity_set("workitems").unwrap();
        assert_eq!(work_items.element_type_hierarchy().len(), 3);
        assert!(work_items.find_navigation("FoundBy").is_some());
        assert!(container
            .entity_sets()
            .iter()
            .all(|set| set.element_type().count_key_properties() == 1));
    }

    #[tokio::test]
    async fn test_seed_data_links_projects_to_owners() {
        let store = scrum_store(true).unwrap();
        let owners = store.related("Projects", &id(1), "Owners").await.unwrap();
        let names: Vec<_> = owners.iter().filter_map(|u| u.get("UserName")).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        assert_eq!(store.list("Priority").await.unwrap().len(), 4);
    }

    #[test]
    fn test_lookup_discovery_covers_lookup_sets() {
        let store = scrum_store(false).unwrap();
        let container = Arc::new(build_container(&store).unwrap());
        let discovery = lookup_discovery(container);

        let mapping = discovery.mapping().unwrap();
        assert_eq!(mapping.len(), 2);
        assert!(discovery.resolve("STATUS").unwrap().is_some());
        assert!(discovery.resolve("Projects").unwrap().is_none());
    }
}
