//! Behavior every backend must share.
//!
//! Each test is instantiated once per backend by `backend_suite!`.

use chrono::{TimeZone, Utc};
use graphstore::{
    ChangeExecutionEngine, ChangesContext, ChangesHook, Error, HookEvent, IdAllocator,
    IdAllocatorConfig, InMemoryStore, LinkType, Query, Resource, ResourceCategory, SqliteStore,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Fixture {
    engine: ChangeExecutionEngine,
    _dir: Option<TempDir>,
}

fn memory() -> Fixture {
    Fixture {
        engine: ChangeExecutionEngine::new(InMemoryStore::new()),
        _dir: None,
    }
}

fn sqlite() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("graph.db")).unwrap();
    Fixture {
        engine: ChangeExecutionEngine::new(store),
        _dir: Some(dir),
    }
}

fn named(resource_type: &str, name: &str) -> Resource {
    Resource::new(resource_type, ResourceCategory::Other).with_property("name", name)
}

fn names(resources: &[Resource]) -> Vec<String> {
    resources
        .iter()
        .filter_map(|r| r.text("name").map(str::to_string))
        .collect()
}

fn add_all(fixture: &Fixture, resources: Vec<Resource>) -> Vec<Resource> {
    let mut changes = ChangesContext::new();
    for resource in resources {
        changes.resource_add(resource);
    }
    fixture.engine.apply(&mut changes).unwrap().added
}

fn inclusive_integer_range(fixture: Fixture) {
    add_all(
        &fixture,
        (1..=5)
            .map(|i| named("Slot", &format!("s{i}")).with_property("n", i))
            .collect(),
    );
    let found = fixture
        .engine
        .reader()
        .find(&Query::of_type("Slot").property_between("n", 2, 4))
        .unwrap();
    assert_eq!(names(&found), vec!["s2", "s3", "s4"]);
}

fn inclusive_date_range(fixture: Fixture) {
    let day = |d| Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap();
    add_all(
        &fixture,
        vec![
            named("Cert", "early").with_property("end", day(1)),
            named("Cert", "edge").with_property("end", day(10)),
            named("Cert", "late").with_property("end", day(20)),
        ],
    );
    let found = fixture
        .engine
        .reader()
        .find(&Query::of_type("Cert").property_lesser_equal("end", day(10)))
        .unwrap();
    assert_eq!(names(&found), vec!["early", "edge"]);
}

fn like_patterns(fixture: Fixture) {
    add_all(
        &fixture,
        ["bcd", "abcd", "zabcd", "abc", "abcde", "zabcdd", "ac", "abtc", "zabtc"]
            .iter()
            .map(|v| named("Word", v))
            .collect(),
    );
    let reader = fixture.engine.reader();
    let like = |pattern: &str| {
        let mut found = names(
            &reader
                .find(&Query::of_type("Word").property_like("name", pattern))
                .unwrap(),
        );
        found.sort();
        found
    };

    assert_eq!(like("%bcd"), vec!["abcd", "bcd", "zabcd"]);
    assert_eq!(like("abc%"), vec!["abc", "abcd", "abcde"]);
    assert_eq!(like("a%c"), vec!["abc", "abtc", "ac"]);
}

fn results_are_ordered_by_id(fixture: Fixture) {
    let added = add_all(
        &fixture,
        vec![named("Host", "c"), named("Host", "a"), named("Host", "b")],
    );
    let found = fixture.engine.reader().find(&Query::of_type("Host")).unwrap();
    assert_eq!(names(&found), vec!["c", "a", "b"]);

    let ids: Vec<i64> = found.iter().filter_map(|r| r.internal_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert_eq!(found, added);
}

fn editor_tag_and_set_membership(fixture: Fixture) {
    let cert = named("Cert", "site")
        .with_editor("self-signed-website-certificate")
        .with_property(
            "domains",
            BTreeSet::from(["a.example.com".to_string(), "b.example.com".to_string()]),
        );
    let other = named("Cert", "other").with_editor("manual");
    add_all(&fixture, vec![cert.clone(), other]);

    let mut changes = ChangesContext::new();
    changes.tag_add(&cert, "prod").tag_add(&cert, "eu");
    fixture.engine.apply(&mut changes).unwrap();

    let reader = fixture.engine.reader();
    let by_editor = reader
        .find(&Query::all().editor("self-signed-website-certificate"))
        .unwrap();
    assert_eq!(names(&by_editor), vec!["site"]);

    let by_tags = reader.find(&Query::all().tag("prod").tag("eu")).unwrap();
    assert_eq!(names(&by_tags), vec!["site"]);
    assert!(reader.find(&Query::all().tag("prod").tag("us")).unwrap().is_empty());

    let by_domain = reader
        .find(&Query::all().property_equals("domains", "b.example.com"))
        .unwrap();
    assert_eq!(names(&by_domain), vec!["site"]);
}

fn find_one_and_internal_ids(fixture: Fixture) {
    let added = add_all(&fixture, vec![named("Host", "a"), named("Host", "b")]);
    let second = added[1].internal_id.unwrap();
    let reader = fixture.engine.reader();

    let found = reader
        .find_one(&Query::all().internal_ids([second]))
        .unwrap()
        .unwrap();
    assert_eq!(found.text("name"), Some("b"));
    assert!(reader.find_one(&Query::of_type("Nothing")).unwrap().is_none());
    assert!(reader.find(&Query::all().internal_ids([])).unwrap().is_empty());
}

#[derive(Default)]
struct Recorder(Mutex<Vec<&'static str>>);

impl ChangesHook for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn handle(&self, event: HookEvent<'_>) -> graphstore::Result<()> {
        self.0.lock().unwrap().push(event.name());
        Ok(())
    }
}

fn commit_counts_and_hook_order(fixture: Fixture) {
    let recorder = Arc::new(Recorder::default());
    let engine = fixture.engine.with_hook(recorder.clone());

    let host = named("Host", "h1");
    let app = named("App", "web");
    let mut changes = ChangesContext::new();
    changes
        .resource_add(host.clone())
        .resource_add(app.clone())
        .link_add(&app, LinkType::InstalledOn, &host)
        .tag_add(&app, "prod");
    let report = engine.apply(&mut changes).unwrap();
    assert_eq!(report.total(), 4);

    let reader = engine.reader();
    let app_id = report.added[1].internal_id.unwrap();
    let host_id = report.added[0].internal_id.unwrap();
    assert!(reader.link_exists(app_id, LinkType::InstalledOn, host_id).unwrap());
    assert_eq!(names(&reader.find_linked_from(app_id, LinkType::InstalledOn).unwrap()), vec!["h1"]);
    assert_eq!(names(&reader.find_linked_to(host_id, LinkType::InstalledOn).unwrap()), vec!["web"]);

    let updated = named("App", "web").with_property("replicas", 2);
    changes
        .resource_update(app_id, updated)
        .link_delete(&report.added[1], LinkType::InstalledOn, &report.added[0])
        .tag_delete(&report.added[1], "prod")
        .resource_delete(host_id);
    let report = engine.apply(&mut changes).unwrap();
    assert_eq!(report.updated, 1);
    assert_eq!(report.links_deleted, 1);
    assert_eq!(report.tags_deleted, 1);
    assert_eq!(report.deleted, 1);

    assert_eq!(
        *recorder.0.lock().unwrap(),
        vec![
            "fillApplyChangesContext",
            "resourceAdded",
            "resourceAdded",
            "linkAdded",
            "tagAdded",
            "success",
            "fillApplyChangesContext",
            "resourceUpdated",
            "linkDeleted",
            "tagDeleted",
            "resourceDeleted",
            "success",
        ]
    );
    assert!(reader.links_from(app_id).unwrap().is_empty());
    assert!(reader.tags_of(app_id).unwrap().is_empty());
    assert_eq!(
        reader.find_by_id(app_id).unwrap().unwrap().integer("replicas"),
        Some(2)
    );
}

struct Veto;

impl ChangesHook for Veto {
    fn name(&self) -> &str {
        "veto"
    }

    fn handle(&self, event: HookEvent<'_>) -> graphstore::Result<()> {
        match event {
            HookEvent::TagAdded { .. } => Err(Error::validation("no tags")),
            _ => Ok(()),
        }
    }
}

fn failed_batch_changes_nothing(fixture: Fixture) {
    let engine = fixture.engine.with_hook(Arc::new(Veto));
    let host = named("Host", "h1");
    let mut changes = ChangesContext::new();
    changes.resource_add(host.clone()).tag_add(&host, "prod");

    assert!(engine.apply(&mut changes).is_err());
    assert!(changes.is_empty());
    assert_eq!(engine.reader().count(&Query::all()).unwrap(), 0);
}

fn ids_are_never_reused(fixture: Fixture) {
    let first = add_all(&fixture, vec![named("Host", "a")]);
    let first_id = first[0].internal_id.unwrap();

    let mut changes = ChangesContext::new();
    changes.resource_delete(first_id);
    fixture.engine.apply(&mut changes).unwrap();

    let second = add_all(&fixture, vec![named("Host", "a")]);
    assert!(second[0].internal_id.unwrap() > first_id);
}

fn allocator_finds_gap(fixture: Fixture) {
    add_all(
        &fixture,
        [2000, 2001, 2003]
            .iter()
            .map(|id| named("UnixUser", &format!("u{id}")).with_property("id", *id))
            .collect(),
    );
    let allocator = IdAllocator::new(fixture.engine.reader());
    allocator
        .configure(IdAllocatorConfig::new("UnixUser", "id", 2000, 2003))
        .unwrap();

    let id = allocator.get_next_available_id().unwrap();
    assert_eq!(id, 2002);

    add_all(
        &fixture,
        vec![named("UnixUser", "u2002").with_property("id", id)],
    );
    allocator.invalidate().unwrap();
    assert!(matches!(
        allocator.get_next_available_id(),
        Err(Error::Exhausted { .. })
    ));
}

macro_rules! backend_suite {
    ($backend:ident: $($test:ident),* $(,)?) => {
        mod $backend {
            $(
                #[test]
                fn $test() {
                    super::$test(super::$backend());
                }
            )*
        }
    };
}

backend_suite!(memory:
    inclusive_integer_range,
    inclusive_date_range,
    like_patterns,
    results_are_ordered_by_id,
    editor_tag_and_set_membership,
    find_one_and_internal_ids,
    commit_counts_and_hook_order,
    failed_batch_changes_nothing,
    ids_are_never_reused,
    allocator_finds_gap,
);

backend_suite!(sqlite:
    inclusive_integer_range,
    inclusive_date_range,
    like_patterns,
    results_are_ordered_by_id,
    editor_tag_and_set_membership,
    find_one_and_internal_ids,
    commit_counts_and_hook_order,
    failed_batch_changes_nothing,
    ids_are_never_reused,
    allocator_finds_gap,
);
