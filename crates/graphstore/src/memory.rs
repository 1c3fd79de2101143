//! In-memory backend
//!
//! The graph is an immutable snapshot behind an `RwLock<Arc<_>>`. A commit
//! works on a private copy and swaps it in only when every item succeeded, so
//! readers always see the last committed state and never a half-applied batch.

use crate::error::{Error, Result};
use crate::query::Query;
use crate::resource::{InternalId, LinkRecord, Resource};
use crate::store::sealed::Commit;
use crate::store::{CommitBatch, CommitTarget, CommittedItem, LinkFilter, StoreBackend, run_commit};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
struct GraphState {
    next_id: InternalId,
    resources: BTreeMap<InternalId, Resource>,
    links: BTreeSet<LinkRecord>,
    tags: BTreeMap<InternalId, BTreeSet<String>>,
}

impl Default for GraphState {
    fn default() -> Self {
        Self {
            next_id: 1,
            resources: BTreeMap::new(),
            links: BTreeSet::new(),
            tags: BTreeMap::new(),
        }
    }
}

impl CommitTarget for GraphState {
    fn load(&self, internal_id: InternalId) -> Result<Resource> {
        self.resources
            .get(&internal_id)
            .cloned()
            .ok_or_else(|| Error::validation(format!("resource #{internal_id} does not exist")))
    }

    fn insert_resource(&mut self, resource: &Resource) -> Result<InternalId> {
        let id = self.next_id;
        self.next_id += 1;
        self.resources
            .insert(id, resource.clone().with_internal_id(id));
        Ok(id)
    }

    fn replace_resource(&mut self, internal_id: InternalId, resource: &Resource) -> Result<()> {
        match self.resources.get_mut(&internal_id) {
            Some(slot) => {
                *slot = resource.clone().with_internal_id(internal_id);
                Ok(())
            }
            None => Err(Error::validation(format!(
                "resource #{internal_id} does not exist"
            ))),
        }
    }

    fn remove_resource(&mut self, internal_id: InternalId) -> Result<()> {
        self.resources.remove(&internal_id);
        self.links
            .retain(|l| l.from_id != internal_id && l.to_id != internal_id);
        self.tags.remove(&internal_id);
        Ok(())
    }

    fn insert_link(&mut self, record: &LinkRecord) -> Result<()> {
        self.links.insert(*record);
        Ok(())
    }

    fn remove_link(&mut self, record: &LinkRecord) -> Result<()> {
        self.links.remove(record);
        Ok(())
    }

    fn insert_tag(&mut self, internal_id: InternalId, tag_name: &str) -> Result<()> {
        self.tags
            .entry(internal_id)
            .or_default()
            .insert(tag_name.to_string());
        Ok(())
    }

    fn remove_tag(&mut self, internal_id: InternalId, tag_name: &str) -> Result<()> {
        if let Some(tags) = self.tags.get_mut(&internal_id) {
            tags.remove(tag_name);
            if tags.is_empty() {
                self.tags.remove(&internal_id);
            }
        }
        Ok(())
    }
}

/// Graph kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<Arc<GraphState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Result<Arc<GraphState>> {
        self.state
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| Error::Poisoned("in-memory graph"))
    }
}

impl StoreBackend for InMemoryStore {
    fn find(&self, query: &Query) -> Result<Vec<Resource>> {
        let snapshot = self.snapshot()?;
        let no_tags = BTreeSet::new();
        Ok(snapshot
            .resources
            .iter()
            .filter(|(id, resource)| {
                let tags = snapshot.tags.get(*id).unwrap_or(&no_tags);
                query.matches(resource, tags)
            })
            .map(|(_, resource)| resource.clone())
            .collect())
    }

    fn find_by_id(&self, internal_id: InternalId) -> Result<Option<Resource>> {
        Ok(self.snapshot()?.resources.get(&internal_id).cloned())
    }

    fn find_links(&self, filter: &LinkFilter) -> Result<Vec<LinkRecord>> {
        Ok(self
            .snapshot()?
            .links
            .iter()
            .filter(|l| filter.matches(l))
            .copied()
            .collect())
    }

    fn tags_of(&self, internal_id: InternalId) -> Result<BTreeSet<String>> {
        Ok(self
            .snapshot()?
            .tags
            .get(&internal_id)
            .cloned()
            .unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

impl Commit for InMemoryStore {
    fn commit(
        &self,
        batch: &CommitBatch,
        on_item: &mut dyn FnMut(&CommittedItem) -> Result<()>,
    ) -> Result<Vec<Resource>> {
        let mut working = GraphState::clone(&*self.snapshot()?);
        let added = run_commit(&mut working, batch, on_item)?;

        let mut guard = self
            .state
            .write()
            .map_err(|_| Error::Poisoned("in-memory graph"))?;
        *guard = Arc::new(working);
        Ok(added)
    }
}
