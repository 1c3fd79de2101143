//! `infragraph resources`
//!
//! Import files describe resources and the links between them:
//!
//! ```toml
//! [[resource]]
//! key = "host"
//! type = "Machine"
//! properties = { name = "web-1" }
//!
//! [[resource]]
//! key = "web"
//! type = "Application"
//! tags = ["public"]
//! properties = { name = "web", instructions = "FROM nginx", ports = ["443:8443/external"] }
//!
//! [[link]]
//! from = "web"
//! type = "INSTALLED_ON"
//! to = "host"
//! ```
//!
//! A whole import is one batch. Resources equal to a stored one are reused;
//! a stored resource of the same type and name is updated in place.

use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;
use graphstore::{ChangesContext, GraphReader, LinkType, PropertyValue, Query, Resource};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::app::App;
use crate::cli::{ListArgs, ResourcesCommand};
use crate::plugin::PluginRegistry;
use crate::ui;

pub fn run(app: &App, cmd: ResourcesCommand) -> Result<()> {
    match cmd {
        ResourcesCommand::List(args) => list(app, &args),
        ResourcesCommand::Import { path, dry_run } => import(app, &path, dry_run),
    }
}

// ============================================================================
// List
// ============================================================================

/// Build the query described by the list filters
pub fn build_query(args: &ListArgs) -> Result<Query> {
    let mut query = match &args.resource_type {
        Some(resource_type) => Query::of_type(resource_type),
        None => Query::all(),
    };
    if let Some(editor) = &args.editor {
        query = query.editor(editor);
    }
    for tag in &args.tag {
        query = query.tag(tag);
    }
    for like in &args.like {
        let (name, pattern) = like
            .split_once('=')
            .with_context(|| format!("--like expects name=pattern, got '{like}'"))?;
        query = query.property_like(name, pattern);
    }
    Ok(query)
}

fn list(app: &App, args: &ListArgs) -> Result<()> {
    let reader = app.engine.reader();
    let resources = reader.find(&build_query(args)?)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resources)?);
        return Ok(());
    }

    ui::header(&format!("Resources ({})", resources.len()));
    for resource in &resources {
        let (id, tags) = match resource.internal_id {
            Some(id) => (id.to_string(), reader.tags_of(id)?),
            None => ("-".to_string(), BTreeSet::new()),
        };
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(
                " {}",
                tags.iter()
                    .map(|t| format!("#{t}"))
                    .collect::<Vec<_>>()
                    .join(" ")
                    .cyan()
            )
        };
        let label = resource
            .text("name")
            .or_else(|| resource.text("domain"))
            .unwrap_or("");
        println!(
            "  {:>5}  {:<20} {}{}",
            id.dimmed(),
            resource.resource_type.bold(),
            label,
            tags
        );
        if let Some(editor) = &resource.editor_name {
            ui::dim(&format!("       editor: {editor}"));
        }
    }
    Ok(())
}

// ============================================================================
// Import
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImportFile {
    #[serde(default)]
    resource: Vec<ResourceEntry>,
    #[serde(default)]
    link: Vec<LinkEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ResourceEntry {
    /// Reference used by links of the same import
    key: String,
    #[serde(rename = "type")]
    resource_type: String,
    editor: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    properties: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkEntry {
    from: String,
    #[serde(rename = "type")]
    link_type: String,
    to: String,
}

/// What an import batch contains
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub links: usize,
    pub tags: usize,
}

fn import(app: &App, path: &Path, dry_run: bool) -> Result<()> {
    let files = import_files(path)?;
    ui::header(&format!("Importing {} file(s)", files.len()));

    let mut merged = ImportFile::default();
    for file in &files {
        let content = fs::read_to_string(file).with_context(|| format!("Could not read {}", file.display()))?;
        let parsed: ImportFile =
            toml::from_str(&content).with_context(|| format!("Invalid import file {}", file.display()))?;
        ui::dim(&format!(
            "{}: {} resource(s), {} link(s)",
            file.display(),
            parsed.resource.len(),
            parsed.link.len()
        ));
        merged.resource.extend(parsed.resource);
        merged.link.extend(parsed.link);
    }

    let (mut changes, stats) = prepare_import(&app.engine.reader(), &app.registry, merged)?;
    ui::kv("Add", &stats.added.to_string());
    ui::kv("Update", &stats.updated.to_string());
    ui::kv("Unchanged", &stats.unchanged.to_string());
    ui::kv("Links", &stats.links.to_string());
    ui::kv("Tags", &stats.tags.to_string());

    if dry_run {
        ui::warn("Dry run - nothing committed");
        return Ok(());
    }

    let report = app.engine.apply(&mut changes).context("Import rejected")?;
    ui::success(&format!("Committed {} change(s)", report.total()));
    Ok(())
}

/// `path` itself, or every `*.toml` below it in path order
fn import_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        anyhow::bail!("{} does not exist", path.display());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Could not walk {}", path.display()))?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|ext| ext == "toml") {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn prepare_import(
    reader: &GraphReader,
    registry: &PluginRegistry,
    file: ImportFile,
) -> Result<(ChangesContext, ImportStats)> {
    let mut changes = ChangesContext::new();
    let mut stats = ImportStats::default();
    let mut by_key: BTreeMap<String, Resource> = BTreeMap::new();

    for entry in file.resource {
        if by_key.contains_key(&entry.key) {
            anyhow::bail!("Key '{}' is defined twice", entry.key);
        }
        let resource = to_resource(registry, &entry)?;

        let target = if let Some(existing) = reader.find_equal(&resource)? {
            stats.unchanged += 1;
            existing
        } else if let Some(existing) = same_identity(reader, &resource)? {
            let id = existing.internal_id.context("Stored resource has no id")?;
            stats.updated += 1;
            changes.resource_update(id, resource.clone());
            resource.with_internal_id(id)
        } else {
            stats.added += 1;
            changes.resource_add(resource.clone());
            resource
        };

        for tag in &entry.tags {
            changes.tag_add(&target, tag);
            stats.tags += 1;
        }
        by_key.insert(entry.key, target);
    }

    for link in file.link {
        let resolve = |key: &str| {
            by_key
                .get(key)
                .with_context(|| format!("Link refers to unknown key '{key}'"))
        };
        let link_type: LinkType = link.link_type.parse()?;
        changes.link_add(resolve(&link.from)?, link_type, resolve(&link.to)?);
        stats.links += 1;
    }

    Ok((changes, stats))
}

/// Stored resource of the same type with the same name or domain
fn same_identity(reader: &GraphReader, resource: &Resource) -> Result<Option<Resource>> {
    for property in ["name", "domain"] {
        if let Some(value) = resource.text(property) {
            let query = Query::of_type(&resource.resource_type).property_equals(property, value);
            return Ok(reader.find_one(&query)?);
        }
    }
    Ok(None)
}

fn to_resource(registry: &PluginRegistry, entry: &ResourceEntry) -> Result<Resource> {
    let spec = registry
        .resource_type(&entry.resource_type)
        .with_context(|| format!("{}: unknown resource type '{}'", entry.key, entry.resource_type))?;

    let mut resource = Resource::new(&entry.resource_type, spec.category);
    if let Some(editor) = &entry.editor {
        resource = resource.with_editor(editor);
    }
    for (name, value) in &entry.properties {
        let value = property_value(value).with_context(|| format!("{}: property '{name}'", entry.key))?;
        resource.set(name, value);
    }
    Ok(resource)
}

fn property_value(value: &toml::Value) -> Result<PropertyValue> {
    Ok(match value {
        toml::Value::String(s) => PropertyValue::Text(s.clone()),
        toml::Value::Integer(i) => PropertyValue::Integer(*i),
        toml::Value::Boolean(b) => PropertyValue::Bool(*b),
        toml::Value::Datetime(dt) => {
            let parsed = DateTime::parse_from_rfc3339(&dt.to_string())
                .with_context(|| format!("'{dt}' needs a date, a time and an offset"))?;
            PropertyValue::Date(parsed.with_timezone(&Utc))
        }
        toml::Value::Array(items) => {
            let mut set = BTreeSet::new();
            for item in items {
                let text = item.as_str().context("arrays may only hold strings")?;
                set.insert(text.to_string());
            }
            PropertyValue::TextSet(set)
        }
        other => anyhow::bail!("unsupported value {other}"),
    })
}
