//! Resources, links and tags
//!
//! A [`Resource`] is a type tag plus a flat property map. Equality and hashing
//! look at the content only: the storage identity (`internal_id`) never takes
//! part, so two resources holding the same data are equal whether or not they
//! have been persisted.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Storage identity of a persisted resource.
pub type InternalId = i64;

/// A single property value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Integer(i64),
    Bool(bool),
    Date(DateTime<Utc>),
    TextSet(BTreeSet<String>),
}

impl PropertyValue {
    /// Order two values of the same kind. Values of different kinds are not
    /// comparable, and neither are booleans or sets.
    pub fn compare(&self, other: &PropertyValue) -> Option<Ordering> {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => Some(a.cmp(b)),
            (Self::Integer(a), Self::Integer(b)) => Some(a.cmp(b)),
            (Self::Date(a), Self::Date(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Text representation used by pattern matching.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Date(d) => write!(f, "{}", d.to_rfc3339()),
            Self::TextSet(set) => {
                let items: Vec<&str> = set.iter().map(String::as_str).collect();
                write!(f, "[{}]", items.join(", "))
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<BTreeSet<String>> for PropertyValue {
    fn from(value: BTreeSet<String>) -> Self {
        Self::TextSet(value)
    }
}

/// Classification of a resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceCategory {
    Infrastructure,
    Application,
    Security,
    Network,
    #[default]
    Other,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Application => "application",
            Self::Security => "security",
            Self::Network => "network",
            Self::Other => "other",
        }
    }
}

/// A typed node of the infrastructure graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    /// Assigned by the store on first commit, never reused
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_id: Option<InternalId>,
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_name: Option<String>,
    #[serde(default)]
    pub category: ResourceCategory,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, category: ResourceCategory) -> Self {
        Self {
            internal_id: None,
            resource_type: resource_type.into(),
            editor_name: None,
            category,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_editor(mut self, editor_name: impl Into<String>) -> Self {
        self.editor_name = Some(editor_name.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyValue> {
        self.properties.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(PropertyValue::as_text)
    }

    pub fn integer(&self, name: &str) -> Option<i64> {
        match self.get(name) {
            Some(PropertyValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(PropertyValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name) {
            Some(PropertyValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    pub fn text_set(&self, name: &str) -> Option<&BTreeSet<String>> {
        match self.get(name) {
            Some(PropertyValue::TextSet(set)) => Some(set),
            _ => None,
        }
    }

    /// Like [`Resource::text`] but a missing property is a validation error.
    pub fn require_text(&self, name: &str) -> Result<&str> {
        self.text(name)
            .ok_or_else(|| Error::validation(format!("{} is missing text property '{name}'", self)))
    }

    /// Like [`Resource::date`] but a missing property is a validation error.
    pub fn require_date(&self, name: &str) -> Result<DateTime<Utc>> {
        self.date(name)
            .ok_or_else(|| Error::validation(format!("{} is missing date property '{name}'", self)))
    }

    /// Copy of this resource carrying a different identity.
    pub fn with_internal_id(mut self, internal_id: InternalId) -> Self {
        self.internal_id = Some(internal_id);
        self
    }

    /// Copy of this resource without identity, as it would be before its first commit.
    pub fn detached(&self) -> Self {
        Self {
            internal_id: None,
            ..self.clone()
        }
    }
}

impl PartialEq for Resource {
    fn eq(&self, other: &Self) -> bool {
        self.resource_type == other.resource_type
            && self.editor_name == other.editor_name
            && self.category == other.category
            && self.properties == other.properties
    }
}

impl Eq for Resource {}

impl Hash for Resource {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.resource_type.hash(state);
        self.editor_name.hash(state);
        self.category.hash(state);
        self.properties.hash(state);
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self
            .text("name")
            .or_else(|| self.text("domain"))
            .unwrap_or("");
        match self.internal_id {
            Some(id) => write!(f, "{}#{id}", self.resource_type)?,
            None => write!(f, "{}(new)", self.resource_type)?,
        }
        if !label.is_empty() {
            write!(f, " {label}")?;
        }
        Ok(())
    }
}

/// Strongly-typed view over a [`Resource`].
///
/// Implementations own a fixed type tag and convert to and from the flat
/// property form the store persists.
pub trait TypedResource: Sized {
    /// Type tag written to [`Resource::resource_type`]
    const TYPE: &'static str;
    /// Category of every resource of this type
    const CATEGORY: ResourceCategory;

    fn to_resource(&self) -> Resource;

    fn from_resource(resource: &Resource) -> Result<Self>;

    /// Check the tag before converting.
    fn try_from_resource(resource: &Resource) -> Result<Self> {
        if resource.resource_type != Self::TYPE {
            return Err(Error::validation(format!(
                "expected a {} resource, got {}",
                Self::TYPE,
                resource.resource_type
            )));
        }
        Self::from_resource(resource)
    }
}

/// Meaning of a link between two resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkType {
    /// Resource runs on a host
    InstalledOn,
    /// Plain reference
    PointsTo,
    /// Lifecycle ownership
    Manages,
    /// Identity requirement
    RunAs,
    /// Soft dependency
    Uses,
}

impl LinkType {
    pub const ALL: [LinkType; 5] = [
        Self::InstalledOn,
        Self::PointsTo,
        Self::Manages,
        Self::RunAs,
        Self::Uses,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstalledOn => "INSTALLED_ON",
            Self::PointsTo => "POINTS_TO",
            Self::Manages => "MANAGES",
            Self::RunAs => "RUN_AS",
            Self::Uses => "USES",
        }
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown link type: {s}")))
    }
}

/// A directed edge between two persisted resources.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Link {
    pub from: Resource,
    pub link_type: LinkType,
    pub to: Resource,
}

/// Identity-level form of a link, as stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkRecord {
    pub from_id: InternalId,
    pub link_type: LinkType,
    pub to_id: InternalId,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(resource: &Resource) -> u64 {
        let mut hasher = DefaultHasher::new();
        resource.hash(&mut hasher);
        hasher.finish()
    }

    fn machine() -> Resource {
        Resource::new("Machine", ResourceCategory::Infrastructure)
            .with_property("name", "h1.example.com")
            .with_property("cpus", 4)
    }

    #[test]
    fn test_equality_ignores_internal_id() {
        let a = machine().with_internal_id(1);
        let b = machine().with_internal_id(42);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_eq!(a, machine());
    }

    #[test]
    fn test_any_property_change_breaks_equality() {
        let base = machine();
        assert_ne!(base, machine().with_property("cpus", 8));
        assert_ne!(base, machine().with_property("extra", true));
        assert_ne!(base, machine().with_editor("manual"));

        let mut other_category = machine();
        other_category.category = ResourceCategory::Network;
        assert_ne!(base, other_category);
    }

    #[test]
    fn test_clone_keeps_identity() {
        let original = machine().with_internal_id(7);
        let copy = original.clone();
        assert_eq!(copy.internal_id, Some(7));
        assert_eq!(original.detached().internal_id, None);
    }

    #[test]
    fn test_link_type_round_trips_through_text() {
        for link_type in LinkType::ALL {
            assert_eq!(link_type.as_str().parse::<LinkType>().unwrap(), link_type);
        }
        assert!("DEPENDS".parse::<LinkType>().is_err());
    }

    #[test]
    fn test_compare_rejects_mixed_kinds() {
        let text = PropertyValue::from("10");
        let int = PropertyValue::from(10);
        assert_eq!(text.compare(&int), None);
        assert_eq!(int.compare(&PropertyValue::from(11)), Some(Ordering::Less));
    }

    #[test]
    fn test_display() {
        assert_eq!(machine().to_string(), "Machine(new) h1.example.com");
        assert_eq!(machine().with_internal_id(3).to_string(), "Machine#3 h1.example.com");
    }
}
