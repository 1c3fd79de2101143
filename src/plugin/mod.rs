//! Plugin registration surface
//!
//! Plugins contribute resource-type schemas, editors, timers, and the
//! application definitions the reconciler converges. They are loaded once
//! into an immutable [`PluginRegistry`]; name clashes are rejected at load.

pub mod builtin;
pub mod types;

use crate::timers::TimerTask;
use declarative::DesiredApplication;
use graphstore::{GraphReader, PropertyValue, Resource, ResourceCategory, TypeRegistry};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use thiserror::Error;

/// Plugin, editor and timer names
static NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("hardcoded regex pattern is valid"));

/// Resource type and property names
static IDENTIFIER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("hardcoded regex pattern is valid")
});

/// Errors raised while loading plugins
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PluginError {
    #[error("plugin '{0}' is registered twice")]
    DuplicatePlugin(String),

    #[error("resource type '{name}' is declared by both '{first}' and '{second}'")]
    DuplicateType {
        name: String,
        first: String,
        second: String,
    },

    #[error("editor '{name}' is declared by both '{first}' and '{second}'")]
    DuplicateEditor {
        name: String,
        first: String,
        second: String,
    },

    #[error("timer '{name}' is declared by both '{first}' and '{second}'")]
    DuplicateTimer {
        name: String,
        first: String,
        second: String,
    },

    #[error("editor '{editor}' edits undeclared resource type '{resource_type}'")]
    UnknownEditorType {
        editor: String,
        resource_type: String,
    },

    #[error("invalid {kind} name '{name}' in plugin '{plugin}'")]
    InvalidName {
        kind: &'static str,
        name: String,
        plugin: String,
    },
}

/// Kind a property value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Text,
    Integer,
    Bool,
    Date,
    TextSet,
}

impl PropertyKind {
    pub fn accepts(self, value: &PropertyValue) -> bool {
        matches!(
            (self, value),
            (Self::Text, PropertyValue::Text(_))
                | (Self::Integer, PropertyValue::Integer(_))
                | (Self::Bool, PropertyValue::Bool(_))
                | (Self::Date, PropertyValue::Date(_))
                | (Self::TextSet, PropertyValue::TextSet(_))
        )
    }
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Bool => "bool",
            Self::Date => "date",
            Self::TextSet => "text set",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub required: bool,
}

impl PropertySpec {
    pub const fn required(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    pub const fn optional(name: &'static str, kind: PropertyKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Extra checks beyond property kinds
pub type Validator = fn(&Resource) -> graphstore::Result<()>;

/// Schema of one resource type.
#[derive(Debug, Clone)]
pub struct ResourceTypeSpec {
    pub name: &'static str,
    pub category: ResourceCategory,
    pub properties: Vec<PropertySpec>,
    pub validate: Option<Validator>,
}

impl ResourceTypeSpec {
    fn check(&self, resource: &Resource) -> graphstore::Result<()> {
        if resource.category != self.category {
            return Err(graphstore::Error::validation(format!(
                "{resource} must have category {}, not {}",
                self.category.as_str(),
                resource.category.as_str()
            )));
        }
        for property in &self.properties {
            match resource.get(property.name) {
                Some(value) if !property.kind.accepts(value) => {
                    return Err(graphstore::Error::validation(format!(
                        "{resource}: property '{}' must be {}",
                        property.name, property.kind
                    )));
                }
                None if property.required => {
                    return Err(graphstore::Error::validation(format!(
                        "{resource}: missing required property '{}'",
                        property.name
                    )));
                }
                _ => {}
            }
        }
        match self.validate {
            Some(validate) => validate(resource),
            None => Ok(()),
        }
    }
}

/// A named way of producing or maintaining resources of one type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorSpec {
    pub name: &'static str,
    pub resource_type: &'static str,
    pub description: &'static str,
}

/// A periodic task contributed by a plugin.
#[derive(Clone)]
pub struct TimerSpec {
    pub name: String,
    pub interval: Duration,
    pub task: Arc<dyn TimerTask>,
}

impl fmt::Debug for TimerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerSpec")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// A unit of functionality registered at startup.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn resource_types(&self) -> Vec<ResourceTypeSpec> {
        Vec::new()
    }

    fn editors(&self) -> Vec<EditorSpec> {
        Vec::new()
    }

    fn timers(&self) -> Vec<TimerSpec> {
        Vec::new()
    }

    /// Applications that should run on `machine`, derived from the graph.
    fn application_definitions(
        &self,
        _reader: &GraphReader,
        _machine: &str,
    ) -> anyhow::Result<Vec<DesiredApplication>> {
        Ok(Vec::new())
    }
}

/// Everything the loaded plugins declare. Immutable once built.
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    /// Type name to (owning plugin, schema)
    types: BTreeMap<String, (String, ResourceTypeSpec)>,
    /// Editor name to (owning plugin, spec)
    editors: BTreeMap<String, (String, EditorSpec)>,
    timers: Vec<TimerSpec>,
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugin_names())
            .field("types", &self.types.keys().collect::<Vec<_>>())
            .field("editors", &self.editors.keys().collect::<Vec<_>>())
            .field("timers", &self.timers)
            .finish()
    }
}

/// Build the registry from `plugins`, in order.
pub fn load_plugins(plugins: Vec<Arc<dyn Plugin>>) -> Result<PluginRegistry, PluginError> {
    let mut registry = PluginRegistry {
        plugins: Vec::with_capacity(plugins.len()),
        types: BTreeMap::new(),
        editors: BTreeMap::new(),
        timers: Vec::new(),
    };
    let mut timer_owners: BTreeMap<String, String> = BTreeMap::new();

    for plugin in plugins {
        let owner = plugin.name().to_string();
        check_name(&NAME_REGEX, "plugin", &owner, &owner)?;
        if registry.plugin_names().contains(&owner.as_str()) {
            return Err(PluginError::DuplicatePlugin(owner));
        }

        for spec in plugin.resource_types() {
            check_name(&IDENTIFIER_REGEX, "resource type", spec.name, &owner)?;
            for property in &spec.properties {
                check_name(&IDENTIFIER_REGEX, "property", property.name, &owner)?;
            }
            if let Some((first, _)) = registry.types.get(spec.name) {
                return Err(PluginError::DuplicateType {
                    name: spec.name.to_string(),
                    first: first.clone(),
                    second: owner,
                });
            }
            registry
                .types
                .insert(spec.name.to_string(), (owner.clone(), spec));
        }

        for editor in plugin.editors() {
            check_name(&NAME_REGEX, "editor", editor.name, &owner)?;
            if let Some((first, _)) = registry.editors.get(editor.name) {
                return Err(PluginError::DuplicateEditor {
                    name: editor.name.to_string(),
                    first: first.clone(),
                    second: owner,
                });
            }
            registry
                .editors
                .insert(editor.name.to_string(), (owner.clone(), editor));
        }

        for timer in plugin.timers() {
            check_name(&NAME_REGEX, "timer", &timer.name, &owner)?;
            if let Some(first) = timer_owners.get(&timer.name) {
                return Err(PluginError::DuplicateTimer {
                    name: timer.name.clone(),
                    first: first.clone(),
                    second: owner,
                });
            }
            timer_owners.insert(timer.name.clone(), owner.clone());
            registry.timers.push(timer);
        }

        log::debug!("Loaded plugin {owner}");
        registry.plugins.push(plugin);
    }

    // Editors may target types of plugins loaded after them
    for (name, (_, editor)) in &registry.editors {
        if !registry.types.contains_key(editor.resource_type) {
            return Err(PluginError::UnknownEditorType {
                editor: name.clone(),
                resource_type: editor.resource_type.to_string(),
            });
        }
    }

    Ok(registry)
}

fn check_name(regex: &Regex, kind: &'static str, name: &str, plugin: &str) -> Result<(), PluginError> {
    if regex.is_match(name) {
        Ok(())
    } else {
        Err(PluginError::InvalidName {
            kind,
            name: name.to_string(),
            plugin: plugin.to_string(),
        })
    }
}

impl PluginRegistry {
    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn resource_type(&self, name: &str) -> Option<&ResourceTypeSpec> {
        self.types.get(name).map(|(_, spec)| spec)
    }

    pub fn resource_types(&self) -> impl Iterator<Item = &ResourceTypeSpec> {
        self.types.values().map(|(_, spec)| spec)
    }

    pub fn editor(&self, name: &str) -> Option<&EditorSpec> {
        self.editors.get(name).map(|(_, spec)| spec)
    }

    pub fn timers(&self) -> &[TimerSpec] {
        &self.timers
    }

    /// Definitions of every plugin for `machine`, in plugin order.
    pub fn desired_applications(
        &self,
        reader: &GraphReader,
        machine: &str,
    ) -> anyhow::Result<Vec<DesiredApplication>> {
        let mut desired = Vec::new();
        for plugin in &self.plugins {
            let definitions = plugin.application_definitions(reader, machine)?;
            log::debug!("{} defines {} application(s)", plugin.name(), definitions.len());
            desired.extend(definitions);
        }
        Ok(desired)
    }
}

impl TypeRegistry for PluginRegistry {
    fn check(&self, resource: &Resource) -> graphstore::Result<()> {
        let Some(spec) = self.resource_type(&resource.resource_type) else {
            return Err(graphstore::Error::validation(format!(
                "unknown resource type '{}'",
                resource.resource_type
            )));
        };
        if let Some(editor) = &resource.editor_name {
            match self.editor(editor) {
                Some(known) if known.resource_type == spec.name => {}
                Some(known) => {
                    return Err(graphstore::Error::validation(format!(
                        "editor '{editor}' edits {} resources, not {}",
                        known.resource_type, spec.name
                    )));
                }
                None => {
                    return Err(graphstore::Error::validation(format!(
                        "unknown editor '{editor}'"
                    )));
                }
            }
        }
        spec.check(resource)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Fake {
        name: &'static str,
        types: Vec<&'static str>,
        editors: Vec<EditorSpec>,
    }

    impl Plugin for Fake {
        fn name(&self) -> &str {
            self.name
        }

        fn resource_types(&self) -> Vec<ResourceTypeSpec> {
            self.types
                .iter()
                .map(|name| ResourceTypeSpec {
                    name: *name,
                    category: ResourceCategory::Other,
                    properties: vec![PropertySpec::required("name", PropertyKind::Text)],
                    validate: None,
                })
                .collect()
        }

        fn editors(&self) -> Vec<EditorSpec> {
            self.editors.clone()
        }
    }

    fn fake(name: &'static str, types: &[&'static str]) -> Arc<dyn Plugin> {
        Arc::new(Fake {
            name,
            types: types.to_vec(),
            editors: Vec::new(),
        })
    }

    #[test]
    fn test_duplicate_plugin_is_rejected() {
        let err = load_plugins(vec![fake("a", &[]), fake("a", &[])]).unwrap_err();
        assert_eq!(err, PluginError::DuplicatePlugin("a".to_string()));
    }

    #[test]
    fn test_duplicate_type_is_rejected() {
        let err = load_plugins(vec![fake("a", &["Thing"]), fake("b", &["Thing"])]).unwrap_err();
        assert!(matches!(err, PluginError::DuplicateType { first, second, .. } if first == "a" && second == "b"));
    }

    #[test]
    fn test_invalid_names_are_rejected() {
        assert!(matches!(
            load_plugins(vec![fake("Bad Name", &[])]),
            Err(PluginError::InvalidName { kind: "plugin", .. })
        ));
        assert!(matches!(
            load_plugins(vec![fake("a", &["has space"])]),
            Err(PluginError::InvalidName { kind: "resource type", .. })
        ));
    }

    #[test]
    fn test_editor_must_target_known_type() {
        let plugin = Arc::new(Fake {
            name: "a",
            types: vec!["Thing"],
            editors: vec![EditorSpec {
                name: "maker",
                resource_type: "Other",
                description: "",
            }],
        });
        assert!(matches!(
            load_plugins(vec![plugin]),
            Err(PluginError::UnknownEditorType { .. })
        ));
    }

    #[test]
    fn test_registry_checks_resources() {
        let registry = load_plugins(vec![fake("a", &["Thing"])]).unwrap();

        let good = Resource::new("Thing", ResourceCategory::Other).with_property("name", "x");
        assert!(registry.check(&good).is_ok());

        let unknown = Resource::new("Other", ResourceCategory::Other);
        assert!(registry.check(&unknown).is_err());

        let missing = Resource::new("Thing", ResourceCategory::Other);
        assert!(registry.check(&missing).is_err());

        let wrong_kind = Resource::new("Thing", ResourceCategory::Other).with_property("name", 3_i64);
        assert!(registry.check(&wrong_kind).is_err());

        let wrong_editor = good.clone().with_editor("nobody");
        assert!(registry.check(&wrong_editor).is_err());
    }
}
