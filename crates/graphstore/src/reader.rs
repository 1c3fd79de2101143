//! Read-only access to the graph.

use crate::error::Result;
use crate::query::Query;
use crate::resource::{InternalId, LinkRecord, LinkType, PropertyValue, Resource};
use crate::store::{LinkFilter, StoreBackend};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Cheap, cloneable handle for querying the last committed graph.
///
/// Readers never block on a pending `apply`: they see the state as of the last
/// completed commit.
#[derive(Clone)]
pub struct GraphReader {
    backend: Arc<dyn StoreBackend>,
}

impl fmt::Debug for GraphReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphReader")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl GraphReader {
    pub(crate) fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self { backend }
    }

    /// Resources matching `query`, ordered by internal id.
    pub fn find(&self, query: &Query) -> Result<Vec<Resource>> {
        self.backend.find(query)
    }

    /// First match of `query`.
    pub fn find_one(&self, query: &Query) -> Result<Option<Resource>> {
        Ok(self.backend.find(query)?.into_iter().next())
    }

    pub fn find_by_id(&self, internal_id: InternalId) -> Result<Option<Resource>> {
        self.backend.find_by_id(internal_id)
    }

    pub fn count(&self, query: &Query) -> Result<usize> {
        Ok(self.backend.find(query)?.len())
    }

    /// Persisted resource structurally equal to `resource`, if any.
    pub fn find_equal(&self, resource: &Resource) -> Result<Option<Resource>> {
        let mut query = Query::of_type(resource.resource_type.clone());
        if let Some(editor) = &resource.editor_name {
            query = query.editor(editor.clone());
        }
        Ok(self
            .backend
            .find(&query)?
            .into_iter()
            .find(|candidate| candidate == resource))
    }

    pub fn links_from(&self, internal_id: InternalId) -> Result<Vec<LinkRecord>> {
        self.backend.find_links(&LinkFilter::from(internal_id))
    }

    pub fn links_to(&self, internal_id: InternalId) -> Result<Vec<LinkRecord>> {
        self.backend.find_links(&LinkFilter::to(internal_id))
    }

    /// Resources `internal_id` points to through `link_type`.
    pub fn find_linked_from(
        &self,
        internal_id: InternalId,
        link_type: LinkType,
    ) -> Result<Vec<Resource>> {
        let links = self
            .backend
            .find_links(&LinkFilter::from(internal_id).of_type(link_type))?;
        self.resolve(links.iter().map(|l| l.to_id))
    }

    /// Resources pointing to `internal_id` through `link_type`.
    pub fn find_linked_to(&self, internal_id: InternalId, link_type: LinkType) -> Result<Vec<Resource>> {
        let links = self
            .backend
            .find_links(&LinkFilter::to(internal_id).of_type(link_type))?;
        self.resolve(links.iter().map(|l| l.from_id))
    }

    pub fn link_exists(&self, from_id: InternalId, link_type: LinkType, to_id: InternalId) -> Result<bool> {
        let filter = LinkFilter {
            from_id: Some(from_id),
            link_type: Some(link_type),
            to_id: Some(to_id),
        };
        Ok(!self.backend.find_links(&filter)?.is_empty())
    }

    pub fn tags_of(&self, internal_id: InternalId) -> Result<BTreeSet<String>> {
        self.backend.tags_of(internal_id)
    }

    /// Integer values of `property` over resources of `resource_type` within
    /// `[from, to]`, ascending.
    pub fn integer_values_between(
        &self,
        resource_type: &str,
        property: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<i64>> {
        let query = Query::of_type(resource_type).property_between(
            property,
            PropertyValue::Integer(from),
            PropertyValue::Integer(to),
        );
        let mut values: Vec<i64> = self
            .backend
            .find(&query)?
            .iter()
            .filter_map(|r| r.integer(property))
            .collect();
        values.sort_unstable();
        values.dedup();
        Ok(values)
    }

    /// Name of the backend serving this reader.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    fn resolve(&self, ids: impl Iterator<Item = InternalId>) -> Result<Vec<Resource>> {
        let ids: BTreeSet<InternalId> = ids.collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.backend.find(&Query::all().internal_ids(ids))
    }
}
