//! Storage backend abstraction
//!
//! A [`StoreBackend`] answers queries and commits prepared batches. Two
//! implementations ship with the crate: [`InMemoryStore`](crate::memory::InMemoryStore)
//! and [`SqliteStore`](crate::sqlite::SqliteStore). Both run their commits
//! through [`run_commit`], so items land in the same order and fire the same
//! callbacks regardless of where the graph lives.
//!
//! Only [`ChangeExecutionEngine`](crate::engine::ChangeExecutionEngine) holds a
//! backend: it takes ownership on construction and hands out read-only
//! [`GraphReader`](crate::reader::GraphReader)s. Committing lives on a sealed
//! supertrait, so code outside this crate cannot write to a backend directly.

use crate::error::{Error, Result};
use crate::query::Query;
use crate::resource::{InternalId, Link, LinkRecord, LinkType, Resource};
use std::collections::BTreeSet;

/// Selection over stored links; `None` fields match anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkFilter {
    pub from_id: Option<InternalId>,
    pub link_type: Option<LinkType>,
    pub to_id: Option<InternalId>,
}

impl LinkFilter {
    pub fn from(from_id: InternalId) -> Self {
        Self {
            from_id: Some(from_id),
            ..Self::default()
        }
    }

    pub fn to(to_id: InternalId) -> Self {
        Self {
            to_id: Some(to_id),
            ..Self::default()
        }
    }

    pub fn of_type(mut self, link_type: LinkType) -> Self {
        self.link_type = Some(link_type);
        self
    }

    pub fn matches(&self, record: &LinkRecord) -> bool {
        self.from_id.is_none_or(|id| id == record.from_id)
            && self.link_type.is_none_or(|t| t == record.link_type)
            && self.to_id.is_none_or(|id| id == record.to_id)
    }
}

/// A resource referenced by a prepared batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// Already persisted
    Existing(InternalId),
    /// Index into [`CommitBatch::adds`]
    Added(usize),
}

impl Endpoint {
    fn resolve(&self, added: &[Resource]) -> Result<InternalId> {
        match self {
            Endpoint::Existing(id) => Ok(*id),
            Endpoint::Added(index) => added
                .get(*index)
                .and_then(|r| r.internal_id)
                .ok_or_else(|| Error::validation(format!("pending resource #{index} was not added"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingLink {
    pub from: Endpoint,
    pub link_type: LinkType,
    pub to: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTag {
    pub resource: Endpoint,
    pub tag_name: String,
}

/// A validated batch, ready to commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitBatch {
    pub adds: Vec<Resource>,
    pub updates: Vec<(InternalId, Resource)>,
    pub link_adds: Vec<PendingLink>,
    pub tag_adds: Vec<PendingTag>,
    pub link_deletes: Vec<LinkRecord>,
    pub tag_deletes: Vec<(InternalId, String)>,
    pub deletes: Vec<InternalId>,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.updates.is_empty()
            && self.link_adds.is_empty()
            && self.tag_adds.is_empty()
            && self.link_deletes.is_empty()
            && self.tag_deletes.is_empty()
            && self.deletes.is_empty()
    }
}

/// One item as it was committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommittedItem {
    ResourceAdded(Resource),
    ResourceUpdated { previous: Resource, current: Resource },
    LinkAdded(Link),
    TagAdded { resource: Resource, tag_name: String },
    LinkDeleted(Link),
    TagDeleted { resource: Resource, tag_name: String },
    ResourceDeleted(Resource),
}

pub(crate) mod sealed {
    use super::{CommitBatch, CommittedItem};
    use crate::error::Result;
    use crate::resource::Resource;

    /// Write path of a backend, callable from within the crate only.
    pub trait Commit {
        /// Commit `batch` atomically.
        ///
        /// `on_item` runs after each item inside the transaction; an error from it
        /// discards everything. Returns the added resources with their new ids.
        fn commit(
            &self,
            batch: &CommitBatch,
            on_item: &mut dyn FnMut(&CommittedItem) -> Result<()>,
        ) -> Result<Vec<Resource>>;
    }
}

/// Persistence collaborator. Implemented by the backends of this crate only.
///
/// Outside the crate a backend can be read but not written:
///
/// ```compile_fail
/// use graphstore::store::CommitBatch;
/// use graphstore::{InMemoryStore, StoreBackend};
///
/// let store = InMemoryStore::new();
/// store.commit(&CommitBatch::default(), &mut |_| Ok::<(), graphstore::Error>(()));
/// ```
pub trait StoreBackend: Send + Sync + sealed::Commit {
    /// Resources matching `query`, ordered by internal id.
    fn find(&self, query: &Query) -> Result<Vec<Resource>>;

    fn find_by_id(&self, internal_id: InternalId) -> Result<Option<Resource>>;

    fn find_links(&self, filter: &LinkFilter) -> Result<Vec<LinkRecord>>;

    fn tags_of(&self, internal_id: InternalId) -> Result<BTreeSet<String>>;

    /// Short backend name for logs.
    fn name(&self) -> &'static str;
}

/// Single-item primitives a backend exposes inside an open transaction.
pub(crate) trait CommitTarget {
    fn load(&self, internal_id: InternalId) -> Result<Resource>;
    fn insert_resource(&mut self, resource: &Resource) -> Result<InternalId>;
    fn replace_resource(&mut self, internal_id: InternalId, resource: &Resource) -> Result<()>;
    fn remove_resource(&mut self, internal_id: InternalId) -> Result<()>;
    fn insert_link(&mut self, record: &LinkRecord) -> Result<()>;
    fn remove_link(&mut self, record: &LinkRecord) -> Result<()>;
    fn insert_tag(&mut self, internal_id: InternalId, tag_name: &str) -> Result<()>;
    fn remove_tag(&mut self, internal_id: InternalId, tag_name: &str) -> Result<()>;
}

fn load_link<T: CommitTarget>(target: &T, record: &LinkRecord) -> Result<Link> {
    Ok(Link {
        from: target.load(record.from_id)?,
        link_type: record.link_type,
        to: target.load(record.to_id)?,
    })
}

/// Apply `batch` to `target` in commit order: resource adds, updates, link
/// adds, tag adds, link deletes, tag deletes, resource deletes.
pub(crate) fn run_commit<T: CommitTarget>(
    target: &mut T,
    batch: &CommitBatch,
    on_item: &mut dyn FnMut(&CommittedItem) -> Result<()>,
) -> Result<Vec<Resource>> {
    let mut added = Vec::with_capacity(batch.adds.len());
    for resource in &batch.adds {
        let detached = resource.detached();
        let id = target.insert_resource(&detached)?;
        let stored = detached.with_internal_id(id);
        on_item(&CommittedItem::ResourceAdded(stored.clone()))?;
        added.push(stored);
    }

    for (id, resource) in &batch.updates {
        let previous = target.load(*id)?;
        target.replace_resource(*id, &resource.detached())?;
        let current = resource.detached().with_internal_id(*id);
        on_item(&CommittedItem::ResourceUpdated { previous, current })?;
    }

    for pending in &batch.link_adds {
        let record = LinkRecord {
            from_id: pending.from.resolve(&added)?,
            link_type: pending.link_type,
            to_id: pending.to.resolve(&added)?,
        };
        target.insert_link(&record)?;
        on_item(&CommittedItem::LinkAdded(load_link(target, &record)?))?;
    }

    for pending in &batch.tag_adds {
        let id = pending.resource.resolve(&added)?;
        target.insert_tag(id, &pending.tag_name)?;
        on_item(&CommittedItem::TagAdded {
            resource: target.load(id)?,
            tag_name: pending.tag_name.clone(),
        })?;
    }

    for record in &batch.link_deletes {
        let link = load_link(target, record)?;
        target.remove_link(record)?;
        on_item(&CommittedItem::LinkDeleted(link))?;
    }

    for (id, tag_name) in &batch.tag_deletes {
        let resource = target.load(*id)?;
        target.remove_tag(*id, tag_name)?;
        on_item(&CommittedItem::TagDeleted {
            resource,
            tag_name: tag_name.clone(),
        })?;
    }

    for id in &batch.deletes {
        let resource = target.load(*id)?;
        target.remove_resource(*id)?;
        on_item(&CommittedItem::ResourceDeleted(resource))?;
    }

    Ok(added)
}
