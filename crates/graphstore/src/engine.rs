//! Change execution engine
//!
//! The engine is the only holder of a write path into the graph. A call to
//! [`ChangeExecutionEngine::apply`] runs in three phases:
//!
//! 1. **Fill** - hooks may append derived changes to the batch
//! 2. **Prepare** - the batch is validated against the last committed state and
//!    turned into a [`CommitBatch`]; nothing is written yet
//! 3. **Commit** - the backend applies the batch in one transaction, firing one
//!    hook event per item; any hook error rolls the transaction back
//!
//! Calls are serialized. Readers are never blocked by an in-flight `apply`.

use crate::changes::ChangesContext;
use crate::error::{Error, Result};
use crate::hook::{ChangesHook, HookEvent};
use crate::reader::GraphReader;
use crate::resource::{InternalId, LinkRecord, Resource};
use crate::store::sealed::Commit;
use crate::store::{CommitBatch, CommittedItem, Endpoint, PendingLink, PendingTag, StoreBackend};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

/// Checks resources against the schemas known to the process.
pub trait TypeRegistry: Send + Sync {
    /// Reject resources of unknown types or with malformed properties.
    fn check(&self, resource: &Resource) -> Result<()>;
}

/// Engine tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Consecutive failures of the same batch before it is reported as a
    /// repeated failure
    pub max_consecutive_failures: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 3,
        }
    }
}

/// Outcome of a committed batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Added resources with their new ids, in insertion order
    pub added: Vec<Resource>,
    pub updated: usize,
    pub links_added: usize,
    pub tags_added: usize,
    pub links_deleted: usize,
    pub tags_deleted: usize,
    pub deleted: usize,
}

impl CommitReport {
    fn record(&mut self, item: &CommittedItem) {
        match item {
            // `added` is filled from the backend result
            CommittedItem::ResourceAdded(_) => {}
            CommittedItem::ResourceUpdated { .. } => self.updated += 1,
            CommittedItem::LinkAdded(_) => self.links_added += 1,
            CommittedItem::TagAdded { .. } => self.tags_added += 1,
            CommittedItem::LinkDeleted(_) => self.links_deleted += 1,
            CommittedItem::TagDeleted { .. } => self.tags_deleted += 1,
            CommittedItem::ResourceDeleted(_) => self.deleted += 1,
        }
    }

    /// Number of committed items.
    pub fn total(&self) -> usize {
        self.added.len()
            + self.updated
            + self.links_added
            + self.tags_added
            + self.links_deleted
            + self.tags_deleted
            + self.deleted
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

fn item_event(item: &CommittedItem) -> HookEvent<'_> {
    match item {
        CommittedItem::ResourceAdded(resource) => HookEvent::ResourceAdded(resource),
        CommittedItem::ResourceUpdated { previous, current } => {
            HookEvent::ResourceUpdated { previous, current }
        }
        CommittedItem::LinkAdded(link) => HookEvent::LinkAdded(link),
        CommittedItem::TagAdded { resource, tag_name } => HookEvent::TagAdded { resource, tag_name },
        CommittedItem::LinkDeleted(link) => HookEvent::LinkDeleted(link),
        CommittedItem::TagDeleted { resource, tag_name } => {
            HookEvent::TagDeleted { resource, tag_name }
        }
        CommittedItem::ResourceDeleted(resource) => HookEvent::ResourceDeleted(resource),
    }
}

/// Serialized, all-or-nothing writer of the resource graph.
pub struct ChangeExecutionEngine {
    backend: Arc<dyn StoreBackend>,
    reader: GraphReader,
    hooks: Vec<Arc<dyn ChangesHook>>,
    registry: Option<Arc<dyn TypeRegistry>>,
    options: EngineOptions,
    /// Held for the whole of `apply`; maps batch fingerprints to their
    /// consecutive failure count
    failures: Mutex<HashMap<String, u32>>,
}

impl ChangeExecutionEngine {
    /// Take ownership of `backend`. From here on the engine is its only writer.
    pub fn new(backend: impl StoreBackend + 'static) -> Self {
        let backend: Arc<dyn StoreBackend> = Arc::new(backend);
        Self {
            reader: GraphReader::new(Arc::clone(&backend)),
            backend,
            hooks: Vec::new(),
            registry: None,
            options: EngineOptions::default(),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Append a hook. Hooks are notified in registration order.
    pub fn with_hook(mut self, hook: Arc<dyn ChangesHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn with_registry(mut self, registry: Arc<dyn TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Read handle on the committed graph.
    pub fn reader(&self) -> GraphReader {
        self.reader.clone()
    }

    /// Commit every change in `changes` or none of them.
    ///
    /// `changes` is cleared when this returns, whatever the outcome.
    pub fn apply(&self, changes: &mut ChangesContext) -> Result<CommitReport> {
        let result = match self.failures.lock() {
            Ok(mut failures) => self.apply_serialized(changes, &mut failures),
            Err(_) => Err(Error::Poisoned("change engine")),
        };
        changes.clear();
        result
    }

    fn apply_serialized(
        &self,
        changes: &mut ChangesContext,
        failures: &mut HashMap<String, u32>,
    ) -> Result<CommitReport> {
        // Identify the batch as the caller built it, before hooks extend it
        let fingerprint = changes.fingerprint();

        match self.try_apply(changes) {
            Ok(report) => {
                failures.remove(&fingerprint);
                log::debug!(
                    "Committed {} item(s) to {} store",
                    report.total(),
                    self.backend.name()
                );
                self.notify_quietly(|| HookEvent::Success(&report));
                Ok(report)
            }
            Err(error) => Err(self.count_failure(failures, fingerprint, changes, error)),
        }
    }

    /// Report a failure of work identified by `key` rather than by its batch.
    ///
    /// For producers whose batch differs on every attempt, or that fail before
    /// building one. `changes` describes what was attempted. Consecutive
    /// reports under the same key count like failures of the same batch and
    /// reach `FailureInfinite` at the same threshold. Returns `error`, or
    /// [`Error::RepeatedFailure`] once the threshold is reached.
    pub fn report_failure(&self, key: &str, changes: &ChangesContext, error: Error) -> Error {
        match self.failures.lock() {
            Ok(mut failures) => self.count_failure(&mut failures, key.to_string(), changes, error),
            Err(_) => Error::Poisoned("change engine"),
        }
    }

    /// Reset the failure count of `key`.
    pub fn report_success(&self, key: &str) {
        match self.failures.lock() {
            Ok(mut failures) => {
                failures.remove(key);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(key);
            }
        }
    }

    /// Consecutive failures of `key` so far.
    pub fn failure_count(&self, key: &str) -> u32 {
        match self.failures.lock() {
            Ok(failures) => failures.get(key).copied().unwrap_or(0),
            Err(poisoned) => poisoned.into_inner().get(key).copied().unwrap_or(0),
        }
    }

    fn count_failure(
        &self,
        failures: &mut HashMap<String, u32>,
        key: String,
        changes: &ChangesContext,
        error: Error,
    ) -> Error {
        let attempts = failures.entry(key.clone()).or_insert(0);
        *attempts += 1;
        let attempts = *attempts;

        if attempts < self.options.max_consecutive_failures {
            log::warn!("Change {key} failed (attempt {attempts}): {error}");
            return error;
        }

        log::error!("Change {key} failed {attempts} times in a row, giving up: {error}");
        self.notify_quietly(|| HookEvent::FailureInfinite {
            changes,
            error: &error,
        });
        Error::RepeatedFailure {
            fingerprint: key,
            attempts,
            last_error: error.to_string(),
        }
    }

    fn try_apply(&self, changes: &mut ChangesContext) -> Result<CommitReport> {
        for hook in &self.hooks {
            let event = HookEvent::FillApplyChangesContext {
                reader: &self.reader,
                changes: &mut *changes,
            };
            let name = event.name();
            hook.handle(event).map_err(|e| Error::Hook {
                hook: name,
                message: format!("{}: {e}", hook.name()),
            })?;
        }

        let batch = self.prepare(changes)?;
        if batch.is_empty() {
            return Ok(CommitReport::default());
        }

        let mut report = CommitReport::default();
        let added = self.backend.commit(&batch, &mut |item| {
            report.record(item);
            self.notify_item(item)
        })?;
        report.added = added;
        Ok(report)
    }

    fn notify_item(&self, item: &CommittedItem) -> Result<()> {
        for hook in &self.hooks {
            let event = item_event(item);
            let name = event.name();
            hook.handle(event).map_err(|e| Error::Hook {
                hook: name,
                message: format!("{}: {e}", hook.name()),
            })?;
        }
        Ok(())
    }

    /// Dispatch an event whose hook errors cannot change the outcome.
    fn notify_quietly<'a>(&self, event: impl Fn() -> HookEvent<'a>) {
        for hook in &self.hooks {
            let event = event();
            let name = event.name();
            if let Err(e) = hook.handle(event) {
                log::warn!("Hook {} failed on {name}: {e}", hook.name());
            }
        }
    }

    /// Validate `changes` against the committed graph and resolve every
    /// endpoint to a stored id or a pending add.
    fn prepare(&self, changes: &ChangesContext) -> Result<CommitBatch> {
        let mut batch = CommitBatch::default();

        for resource in changes.resources_to_add() {
            if let Some(id) = resource.internal_id {
                return Err(Error::validation(format!(
                    "{resource} is already persisted as #{id}; use an update"
                )));
            }
            self.check_type(resource)?;
            if batch.adds.contains(resource) {
                return Err(Error::conflict(format!("{resource} is added twice")));
            }
            if let Some(existing) = self.reader.find_equal(resource)? {
                return Err(Error::conflict(format!("{resource} already exists as {existing}")));
            }
            batch.adds.push(resource.detached());
        }

        let mut deleted: BTreeSet<InternalId> = BTreeSet::new();
        for id in changes.resources_to_delete() {
            self.require_existing(*id)?;
            if deleted.insert(*id) {
                batch.deletes.push(*id);
            }
        }

        let mut updated: BTreeSet<InternalId> = BTreeSet::new();
        for (id, resource) in changes.resources_to_update() {
            self.require_existing(*id)?;
            if !updated.insert(*id) {
                return Err(Error::validation(format!("resource #{id} is updated twice")));
            }
            if deleted.contains(id) {
                return Err(Error::validation(format!(
                    "resource #{id} is both updated and deleted"
                )));
            }
            self.check_type(resource)?;
            batch.updates.push((*id, resource.detached()));
        }

        for change in changes.links_to_add() {
            let from = self.resolve(&change.from, &batch.adds)?;
            let to = self.resolve(&change.to, &batch.adds)?;
            for endpoint in [from, to] {
                if let Endpoint::Existing(id) = endpoint
                    && deleted.contains(&id)
                {
                    return Err(Error::validation(format!(
                        "link {} -> {} references #{id}, which is being deleted",
                        change.from, change.to
                    )));
                }
            }
            if let (Endpoint::Existing(from_id), Endpoint::Existing(to_id)) = (from, to)
                && self.reader.link_exists(from_id, change.link_type, to_id)?
            {
                continue;
            }
            let pending = PendingLink {
                from,
                link_type: change.link_type,
                to,
            };
            if !batch.link_adds.contains(&pending) {
                batch.link_adds.push(pending);
            }
        }

        for change in changes.tags_to_add() {
            let endpoint = self.resolve(&change.resource, &batch.adds)?;
            if let Endpoint::Existing(id) = endpoint {
                if deleted.contains(&id) {
                    return Err(Error::validation(format!(
                        "tag '{}' targets #{id}, which is being deleted",
                        change.tag_name
                    )));
                }
                if self.reader.tags_of(id)?.contains(&change.tag_name) {
                    continue;
                }
            }
            let pending = PendingTag {
                resource: endpoint,
                tag_name: change.tag_name.clone(),
            };
            if !batch.tag_adds.contains(&pending) {
                batch.tag_adds.push(pending);
            }
        }

        for change in changes.links_to_delete() {
            let from = self.resolve_persisted(&change.from)?;
            let to = self.resolve_persisted(&change.to)?;
            let record = LinkRecord {
                from_id: from,
                link_type: change.link_type,
                to_id: to,
            };
            if self.reader.link_exists(from, change.link_type, to)?
                && !batch.link_deletes.contains(&record)
            {
                batch.link_deletes.push(record);
            }
        }

        for change in changes.tags_to_delete() {
            let id = self.resolve_persisted(&change.resource)?;
            let entry = (id, change.tag_name.clone());
            if self.reader.tags_of(id)?.contains(&change.tag_name)
                && !batch.tag_deletes.contains(&entry)
            {
                batch.tag_deletes.push(entry);
            }
        }

        // A deleted resource takes its links and tags with it
        for id in &batch.deletes {
            for record in self
                .reader
                .links_from(*id)?
                .into_iter()
                .chain(self.reader.links_to(*id)?)
            {
                if !batch.link_deletes.contains(&record) {
                    batch.link_deletes.push(record);
                }
            }
            for tag_name in self.reader.tags_of(*id)? {
                let entry = (*id, tag_name);
                if !batch.tag_deletes.contains(&entry) {
                    batch.tag_deletes.push(entry);
                }
            }
        }

        Ok(batch)
    }

    fn check_type(&self, resource: &Resource) -> Result<()> {
        match &self.registry {
            Some(registry) => registry.check(resource),
            None => Ok(()),
        }
    }

    fn require_existing(&self, id: InternalId) -> Result<Resource> {
        self.reader
            .find_by_id(id)?
            .ok_or_else(|| Error::validation(format!("resource #{id} does not exist")))
    }

    /// Endpoint of a link or tag: a stored id, a pending add, or a stored
    /// resource with the same content.
    fn resolve(&self, resource: &Resource, adds: &[Resource]) -> Result<Endpoint> {
        if let Some(id) = resource.internal_id {
            self.require_existing(id)?;
            return Ok(Endpoint::Existing(id));
        }
        if let Some(index) = adds.iter().position(|added| added == resource) {
            return Ok(Endpoint::Added(index));
        }
        match self.reader.find_equal(resource)? {
            Some(existing) => existing
                .internal_id
                .map(Endpoint::Existing)
                .ok_or_else(|| Error::validation(format!("{existing} has no id"))),
            None => Err(Error::validation(format!("{resource} does not exist"))),
        }
    }

    fn resolve_persisted(&self, resource: &Resource) -> Result<InternalId> {
        match self.resolve(resource, &[])? {
            Endpoint::Existing(id) => Ok(id),
            Endpoint::Added(_) => Err(Error::validation(format!("{resource} is not persisted"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryStore;
    use crate::query::Query;
    use crate::resource::{LinkType, ResourceCategory};
    use std::sync::Mutex as StdMutex;

    fn host(name: &str) -> Resource {
        Resource::new("Machine", ResourceCategory::Infrastructure).with_property("name", name)
    }

    fn app(name: &str) -> Resource {
        Resource::new("Application", ResourceCategory::Application).with_property("name", name)
    }

    /// Records event names; optionally fails on one of them.
    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    impl Recorder {
        fn failing_on(event: &'static str) -> Self {
            Self {
                fail_on: Some(event),
                ..Self::default()
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ChangesHook for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn handle(&self, event: HookEvent<'_>) -> Result<()> {
            let name = event.name();
            self.events.lock().unwrap().push(name.to_string());
            if self.fail_on == Some(name) {
                return Err(Error::validation("refused"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_hooks_fire_in_commit_order() {
        let recorder = Arc::new(Recorder::default());
        let engine = ChangeExecutionEngine::new(InMemoryStore::new()).with_hook(recorder.clone());

        let mut changes = ChangesContext::new();
        changes
            .resource_add(host("h1"))
            .resource_add(app("web"))
            .link_add(&app("web"), LinkType::InstalledOn, &host("h1"))
            .tag_add(&app("web"), "prod");
        let report = engine.apply(&mut changes).unwrap();

        assert_eq!(report.added.len(), 2);
        assert_eq!(report.links_added, 1);
        assert_eq!(report.tags_added, 1);
        assert_eq!(
            recorder.events(),
            vec![
                "fillApplyChangesContext",
                "resourceAdded",
                "resourceAdded",
                "linkAdded",
                "tagAdded",
                "success"
            ]
        );
        assert!(changes.is_empty());
    }

    #[test]
    fn test_hook_error_rolls_back_everything() {
        let recorder = Arc::new(Recorder::failing_on("linkAdded"));
        let engine = ChangeExecutionEngine::new(InMemoryStore::new()).with_hook(recorder.clone());

        let mut changes = ChangesContext::new();
        changes
            .resource_add(host("h1"))
            .resource_add(app("web"))
            .link_add(&app("web"), LinkType::InstalledOn, &host("h1"));
        let err = engine.apply(&mut changes).unwrap_err();

        assert!(matches!(err, Error::Hook { hook: "linkAdded", .. }));
        assert!(engine.reader().find(&Query::all()).unwrap().is_empty());
        assert!(!recorder.events().contains(&"success".to_string()));
        assert!(changes.is_empty());
    }

    struct AutoHost;

    impl ChangesHook for AutoHost {
        fn name(&self) -> &str {
            "auto-host"
        }

        fn handle(&self, event: HookEvent<'_>) -> Result<()> {
            if let HookEvent::FillApplyChangesContext { reader, changes } = event {
                let wants_app = changes
                    .resources_to_add()
                    .iter()
                    .any(|r| r.resource_type == "Application");
                if wants_app && reader.find_equal(&host("auto"))?.is_none() {
                    changes.resource_add(host("auto"));
                }
            }
            Ok(())
        }
    }

    #[test]
    fn test_fill_hook_appends_changes() {
        let engine = ChangeExecutionEngine::new(InMemoryStore::new()).with_hook(Arc::new(AutoHost));

        let mut changes = ChangesContext::new();
        changes.resource_add(app("web"));
        let report = engine.apply(&mut changes).unwrap();

        assert_eq!(report.added.len(), 2);
        assert_eq!(engine.reader().count(&Query::of_type("Machine")).unwrap(), 1);
    }

    #[test]
    fn test_duplicate_add_conflicts() {
        let engine = ChangeExecutionEngine::new(InMemoryStore::new());
        let mut changes = ChangesContext::new();
        changes.resource_add(host("h1"));
        engine.apply(&mut changes).unwrap();

        changes.resource_add(host("h1"));
        let err = engine.apply(&mut changes).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn test_link_to_missing_resource_is_rejected() {
        let engine = ChangeExecutionEngine::new(InMemoryStore::new());
        let mut changes = ChangesContext::new();
        changes
            .resource_add(app("web"))
            .link_add(&app("web"), LinkType::InstalledOn, &host("ghost"));

        let err = engine.apply(&mut changes).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(engine.reader().count(&Query::all()).unwrap(), 0);
    }

    #[test]
    fn test_delete_cascades_links_and_tags() {
        let recorder = Arc::new(Recorder::default());
        let engine = ChangeExecutionEngine::new(InMemoryStore::new()).with_hook(recorder.clone());
        let mut changes = ChangesContext::new();
        changes
            .resource_add(host("h1"))
            .resource_add(app("web"))
            .link_add(&app("web"), LinkType::InstalledOn, &host("h1"))
            .tag_add(&host("h1"), "prod");
        let report = engine.apply(&mut changes).unwrap();
        let host_id = report.added[0].internal_id.unwrap();

        changes.resource_delete(host_id);
        let report = engine.apply(&mut changes).unwrap();

        assert_eq!(report.deleted, 1);
        assert_eq!(report.links_deleted, 1);
        assert_eq!(report.tags_deleted, 1);
        let events = recorder.events();
        let tail: Vec<&str> = events[events.len() - 4..].iter().map(String::as_str).collect();
        assert_eq!(tail, vec!["linkDeleted", "tagDeleted", "resourceDeleted", "success"]);
    }

    #[test]
    fn test_existing_link_and_tag_are_noops() {
        let engine = ChangeExecutionEngine::new(InMemoryStore::new());
        let mut changes = ChangesContext::new();
        changes
            .resource_add(host("h1"))
            .resource_add(app("web"))
            .link_add(&app("web"), LinkType::InstalledOn, &host("h1"))
            .tag_add(&app("web"), "prod");
        engine.apply(&mut changes).unwrap();

        changes
            .link_add(&app("web"), LinkType::InstalledOn, &host("h1"))
            .tag_add(&app("web"), "prod")
            .tag_delete(&app("web"), "absent");
        let report = engine.apply(&mut changes).unwrap();
        assert!(report.is_empty());
    }

    #[test]
    fn test_repeated_failure_fires_failure_infinite() {
        let recorder = Arc::new(Recorder::failing_on("resourceAdded"));
        let engine = ChangeExecutionEngine::new(InMemoryStore::new())
            .with_hook(recorder.clone())
            .with_options(EngineOptions {
                max_consecutive_failures: 2,
            });

        let mut changes = ChangesContext::new();
        changes.resource_add(host("h1"));
        assert!(matches!(
            engine.apply(&mut changes).unwrap_err(),
            Error::Hook { .. }
        ));

        changes.resource_add(host("h1"));
        let err = engine.apply(&mut changes).unwrap_err();
        assert!(matches!(err, Error::RepeatedFailure { attempts: 2, .. }));
        assert!(recorder.events().contains(&"failureInfinite".to_string()));
    }

    #[test]
    fn test_reported_failures_count_by_key() {
        let recorder = Arc::new(Recorder::default());
        let engine = ChangeExecutionEngine::new(InMemoryStore::new())
            .with_hook(recorder.clone())
            .with_options(EngineOptions {
                max_consecutive_failures: 3,
            });

        // A different batch on every attempt, same key
        for attempt in 0..2 {
            let mut changes = ChangesContext::new();
            changes.resource_add(host(&format!("h{attempt}")));
            let err = engine.report_failure("renew:h", &changes, Error::task("renew:h", "no key"));
            assert!(matches!(err, Error::Task { .. }));
        }
        assert_eq!(engine.failure_count("renew:h"), 2);
        assert!(!recorder.events().contains(&"failureInfinite".to_string()));

        let err = engine.report_failure("renew:h", &ChangesContext::new(), Error::task("renew:h", "no key"));
        assert!(matches!(err, Error::RepeatedFailure { attempts: 3, .. }));
        assert_eq!(recorder.events(), vec!["failureInfinite"]);

        engine.report_success("renew:h");
        assert_eq!(engine.failure_count("renew:h"), 0);
        assert_eq!(engine.failure_count("other"), 0);
    }

    struct OnlyMachines;

    impl TypeRegistry for OnlyMachines {
        fn check(&self, resource: &Resource) -> Result<()> {
            if resource.resource_type == "Machine" {
                Ok(())
            } else {
                Err(Error::validation(format!("unknown type {}", resource.resource_type)))
            }
        }
    }

    #[test]
    fn test_registry_rejects_unknown_types() {
        let engine =
            ChangeExecutionEngine::new(InMemoryStore::new()).with_registry(Arc::new(OnlyMachines));
        let mut changes = ChangesContext::new();
        changes.resource_add(host("h1")).resource_add(app("web"));

        assert!(engine.apply(&mut changes).is_err());
        assert_eq!(engine.reader().count(&Query::all()).unwrap(), 0);
    }

    #[test]
    fn test_update_and_delete_of_same_resource_is_rejected() {
        let engine = ChangeExecutionEngine::new(InMemoryStore::new());
        let mut changes = ChangesContext::new();
        changes.resource_add(host("h1"));
        let id = engine.apply(&mut changes).unwrap().added[0].internal_id.unwrap();

        changes
            .resource_update(id, host("h2"))
            .resource_delete(id);
        assert!(matches!(
            engine.apply(&mut changes).unwrap_err(),
            Error::Validation { .. }
        ));
    }
}
