//! Pending graph mutations
//!
//! A [`ChangesContext`] collects what a caller wants to change. Nothing touches
//! the graph until the batch is handed to
//! [`ChangeExecutionEngine::apply`](crate::engine::ChangeExecutionEngine::apply),
//! which commits all of it or none of it and clears the context afterwards.

use crate::resource::{InternalId, LinkType, Resource};
use serde::Serialize;

/// Link endpoints as the caller named them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkChange {
    pub from: Resource,
    pub link_type: LinkType,
    pub to: Resource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagChange {
    pub resource: Resource,
    pub tag_name: String,
}

/// An ordered batch of pending operations.
///
/// Link and tag endpoints may be resources added in the same batch; the
/// engine matches them by content. Persisted resources are matched by
/// `internal_id`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangesContext {
    resources_to_add: Vec<Resource>,
    resources_to_update: Vec<(InternalId, Resource)>,
    resources_to_delete: Vec<InternalId>,
    links_to_add: Vec<LinkChange>,
    links_to_delete: Vec<LinkChange>,
    tags_to_add: Vec<TagChange>,
    tags_to_delete: Vec<TagChange>,
}

impl ChangesContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resource_add(&mut self, resource: Resource) -> &mut Self {
        self.resources_to_add.push(resource);
        self
    }

    /// Replace the content of the persisted resource `internal_id`.
    pub fn resource_update(&mut self, internal_id: InternalId, resource: Resource) -> &mut Self {
        self.resources_to_update.push((internal_id, resource));
        self
    }

    pub fn resource_delete(&mut self, internal_id: InternalId) -> &mut Self {
        self.resources_to_delete.push(internal_id);
        self
    }

    pub fn link_add(&mut self, from: &Resource, link_type: LinkType, to: &Resource) -> &mut Self {
        self.links_to_add.push(LinkChange {
            from: from.clone(),
            link_type,
            to: to.clone(),
        });
        self
    }

    pub fn link_delete(&mut self, from: &Resource, link_type: LinkType, to: &Resource) -> &mut Self {
        self.links_to_delete.push(LinkChange {
            from: from.clone(),
            link_type,
            to: to.clone(),
        });
        self
    }

    pub fn tag_add(&mut self, resource: &Resource, tag_name: impl Into<String>) -> &mut Self {
        self.tags_to_add.push(TagChange {
            resource: resource.clone(),
            tag_name: tag_name.into(),
        });
        self
    }

    pub fn tag_delete(&mut self, resource: &Resource, tag_name: impl Into<String>) -> &mut Self {
        self.tags_to_delete.push(TagChange {
            resource: resource.clone(),
            tag_name: tag_name.into(),
        });
        self
    }

    pub fn resources_to_add(&self) -> &[Resource] {
        &self.resources_to_add
    }

    pub fn resources_to_update(&self) -> &[(InternalId, Resource)] {
        &self.resources_to_update
    }

    pub fn resources_to_delete(&self) -> &[InternalId] {
        &self.resources_to_delete
    }

    pub fn links_to_add(&self) -> &[LinkChange] {
        &self.links_to_add
    }

    pub fn links_to_delete(&self) -> &[LinkChange] {
        &self.links_to_delete
    }

    pub fn tags_to_add(&self) -> &[TagChange] {
        &self.tags_to_add
    }

    pub fn tags_to_delete(&self) -> &[TagChange] {
        &self.tags_to_delete
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.resources_to_add.len()
            + self.resources_to_update.len()
            + self.resources_to_delete.len()
            + self.links_to_add.len()
            + self.links_to_delete.len()
            + self.tags_to_add.len()
            + self.tags_to_delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.resources_to_add.clear();
        self.resources_to_update.clear();
        self.resources_to_delete.clear();
        self.links_to_add.clear();
        self.links_to_delete.clear();
        self.tags_to_add.clear();
        self.tags_to_delete.clear();
    }

    /// Content hash identifying the same logical change across attempts.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        match serde_json::to_vec(self) {
            Ok(bytes) => {
                hasher.update(&bytes);
            }
            Err(e) => {
                // Every field serializes; keep a stable value anyway
                log::warn!("Could not serialize changes for fingerprinting: {e}");
                hasher.update(format!("{self:?}").as_bytes());
            }
        }
        hasher.finalize().to_hex().as_str()[..16].to_string()
    }
}
