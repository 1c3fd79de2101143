//! Resource queries
//!
//! A [`Query`] is a conjunction of predicates. Every backend evaluates property
//! predicates through [`Query::matches`], so a query selects the same resources
//! whether the graph lives in memory or in SQLite.

use crate::resource::{InternalId, PropertyValue, Resource};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Wildcard of [`Query::property_like`] patterns.
pub const LIKE_WILDCARD: char = '%';

/// Comparison applied to one property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyOp {
    Equals(PropertyValue),
    GreaterEqual(PropertyValue),
    LesserEqual(PropertyValue),
    Like(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyPredicate {
    pub name: String,
    pub op: PropertyOp,
}

impl PropertyPredicate {
    fn matches(&self, resource: &Resource) -> bool {
        let Some(actual) = resource.get(&self.name) else {
            return false;
        };

        match &self.op {
            PropertyOp::Equals(expected) => match (actual, expected) {
                (PropertyValue::TextSet(set), PropertyValue::Text(item)) => set.contains(item),
                _ => actual == expected,
            },
            PropertyOp::GreaterEqual(bound) => matches!(
                actual.compare(bound),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            PropertyOp::LesserEqual(bound) => matches!(
                actual.compare(bound),
                Some(Ordering::Less | Ordering::Equal)
            ),
            PropertyOp::Like(pattern) => match actual {
                PropertyValue::Text(text) => like_matches(pattern, text),
                PropertyValue::TextSet(set) => set.iter().any(|t| like_matches(pattern, t)),
                _ => false,
            },
        }
    }
}

/// Selection of resources; all criteria must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    resource_type: Option<String>,
    internal_ids: Option<BTreeSet<InternalId>>,
    editor: Option<String>,
    tags: BTreeSet<String>,
    predicates: Vec<PropertyPredicate>,
}

impl Query {
    /// Query matching every resource.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query matching resources of one type.
    pub fn of_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Self::default()
        }
    }

    pub fn internal_ids(mut self, ids: impl IntoIterator<Item = InternalId>) -> Self {
        self.internal_ids = Some(ids.into_iter().collect());
        self
    }

    pub fn editor(mut self, editor_name: impl Into<String>) -> Self {
        self.editor = Some(editor_name.into());
        self
    }

    /// Require a tag. Calling this several times requires all tags.
    pub fn tag(mut self, tag_name: impl Into<String>) -> Self {
        self.tags.insert(tag_name.into());
        self
    }

    pub fn property_equals(self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.push(name, PropertyOp::Equals(value.into()))
    }

    /// Inclusive lower bound.
    pub fn property_greater_equal(
        self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.push(name, PropertyOp::GreaterEqual(value.into()))
    }

    /// Inclusive upper bound.
    pub fn property_lesser_equal(
        self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> Self {
        self.push(name, PropertyOp::LesserEqual(value.into()))
    }

    /// Inclusive range, shorthand for both bounds.
    pub fn property_between(
        self,
        name: impl Into<String>,
        from: impl Into<PropertyValue>,
        to: impl Into<PropertyValue>,
    ) -> Self {
        let name = name.into();
        self.property_greater_equal(name.clone(), from)
            .property_lesser_equal(name, to)
    }

    /// SQL `LIKE` match where `%` stands for any run of characters.
    pub fn property_like(self, name: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(name, PropertyOp::Like(pattern.into()))
    }

    fn push(mut self, name: impl Into<String>, op: PropertyOp) -> Self {
        self.predicates.push(PropertyPredicate {
            name: name.into(),
            op,
        });
        self
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource_type.as_deref()
    }

    pub fn editor_name(&self) -> Option<&str> {
        self.editor.as_deref()
    }

    pub fn required_tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn required_ids(&self) -> Option<&BTreeSet<InternalId>> {
        self.internal_ids.as_ref()
    }

    pub fn predicates(&self) -> &[PropertyPredicate] {
        &self.predicates
    }

    /// Evaluate the query against a resource and the tags it carries.
    pub fn matches(&self, resource: &Resource, tags: &BTreeSet<String>) -> bool {
        if let Some(resource_type) = &self.resource_type
            && &resource.resource_type != resource_type
        {
            return false;
        }

        if let Some(ids) = &self.internal_ids {
            match resource.internal_id {
                Some(id) if ids.contains(&id) => {}
                _ => return false,
            }
        }

        if let Some(editor) = &self.editor
            && resource.editor_name.as_ref() != Some(editor)
        {
            return false;
        }

        self.tags.is_subset(tags) && self.matches_properties(resource)
    }

    /// Evaluate only the property predicates.
    pub fn matches_properties(&self, resource: &Resource) -> bool {
        self.predicates.iter().all(|p| p.matches(resource))
    }
}

/// Match `value` against a `LIKE` pattern, anchored at both ends and case-sensitive.
pub fn like_matches(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split(LIKE_WILDCARD).collect();
    let [first, middle @ .., last] = parts.as_slice() else {
        // No wildcard at all
        return pattern == value;
    };

    if first.len() + last.len() > value.len()
        || !value.starts_with(first)
        || !value.ends_with(last)
    {
        return false;
    }

    let mut rest = &value[first.len()..value.len() - last.len()];
    for part in middle {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceCategory;

    #[test]
    fn test_like_leading_wildcard() {
        for value in ["bcd", "abcd", "zabcd"] {
            assert!(like_matches("%bcd", value), "{value}");
        }
        assert!(!like_matches("%bcd", "zabcdd"));
    }

    #[test]
    fn test_like_trailing_wildcard() {
        for value in ["abc", "abcd", "abcde"] {
            assert!(like_matches("abc%", value), "{value}");
        }
        assert!(!like_matches("abc%", "zabcde"));
    }

    #[test]
    fn test_like_middle_wildcard() {
        for value in ["ac", "abc", "abtc"] {
            assert!(like_matches("a%c", value), "{value}");
        }
        assert!(!like_matches("a%c", "zabtc"));
        assert!(!like_matches("a%c", "abtcz"));
    }

    #[test]
    fn test_like_without_wildcard_is_exact() {
        assert!(like_matches("abc", "abc"));
        assert!(!like_matches("abc", "abcd"));
        assert!(!like_matches("abc", "ABC"));
    }

    #[test]
    fn test_like_prefix_and_suffix_do_not_overlap() {
        assert!(!like_matches("ab%ba", "aba"));
        assert!(like_matches("ab%ba", "abba"));
    }

    #[test]
    fn test_equals_on_set_means_membership() {
        let cert = Resource::new("WebsiteCertificate", ResourceCategory::Security).with_property(
            "domains",
            BTreeSet::from(["a.example.com".to_string(), "b.example.com".to_string()]),
        );
        let tags = BTreeSet::new();
        assert!(Query::all()
            .property_equals("domains", "a.example.com")
            .matches(&cert, &tags));
        assert!(!Query::all()
            .property_equals("domains", "c.example.com")
            .matches(&cert, &tags));
    }

    #[test]
    fn test_tags_are_conjunctive() {
        let resource = Resource::new("Machine", ResourceCategory::Infrastructure);
        let tags = BTreeSet::from(["prod".to_string()]);
        assert!(Query::all().tag("prod").matches(&resource, &tags));
        assert!(!Query::all().tag("prod").tag("eu").matches(&resource, &tags));
    }

    #[test]
    fn test_mixed_kind_range_never_matches() {
        let resource = Resource::new("UnixUser", ResourceCategory::Infrastructure)
            .with_property("id", "2000");
        assert!(!Query::all()
            .property_greater_equal("id", 1000)
            .matches(&resource, &BTreeSet::new()));
    }
}
