//! The core plugin: machines, applications, unix users and certificates.
//!
//! An `Application` linked `INSTALLED_ON` a `Machine` runs there. Its `USES`
//! links to other applications become start dependencies, `USES` links to
//! certificates become files injected after start, and a `RUN_AS` link to a
//! `UnixUser` creates that user inside the container.

use super::types::{Application, Machine, SELF_SIGNED_EDITOR, UnixUser, WebsiteCertificate};
use super::{EditorSpec, Plugin, PropertyKind, PropertySpec, ResourceTypeSpec, TimerSpec};
use crate::timers::TimerTask;
use crate::timers::cert_renewal::{CertificateRenewalTimer, OpensslAuthority};
use anyhow::Context;
use declarative::{ApplicationDefinition, DesiredApplication, OutputContext, PostStartAction, VolumeMount};
use graphstore::{GraphReader, LinkType, Query, Resource, TypedResource};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

pub const PLUGIN_NAME: &str = "core";

/// Where certificates used by an application are written
pub const CERTIFICATE_DIR: &str = "/etc/ssl/infragraph";

static CONTAINER_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("hardcoded regex pattern is valid")
});

static UNIX_USER_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").expect("hardcoded regex pattern is valid"));

pub struct CorePlugin {
    renewal_interval: Duration,
    renewal_task: Arc<dyn TimerTask>,
}

impl CorePlugin {
    /// Core plugin renewing certificates through `openssl`
    pub fn new(renewal_interval: Duration) -> Self {
        Self {
            renewal_interval,
            renewal_task: Arc::new(CertificateRenewalTimer::new(Arc::new(OpensslAuthority::default()))),
        }
    }

    pub fn with_renewal_task(mut self, task: Arc<dyn TimerTask>) -> Self {
        self.renewal_task = task;
        self
    }
}

impl Plugin for CorePlugin {
    fn name(&self) -> &str {
        PLUGIN_NAME
    }

    fn resource_types(&self) -> Vec<ResourceTypeSpec> {
        use PropertyKind::{Bool, Date, Integer, Text, TextSet};

        vec![
            ResourceTypeSpec {
                name: Machine::TYPE,
                category: Machine::CATEGORY,
                properties: vec![
                    PropertySpec::required("name", Text),
                    PropertySpec::optional("address", Text),
                ],
                validate: None,
            },
            ResourceTypeSpec {
                name: Application::TYPE,
                category: Application::CATEGORY,
                properties: vec![
                    PropertySpec::required("name", Text),
                    PropertySpec::required("instructions", Text),
                    PropertySpec::optional("command", Text),
                    PropertySpec::optional("ports", TextSet),
                    PropertySpec::optional("volumes", TextSet),
                    PropertySpec::optional("environment", TextSet),
                    PropertySpec::optional("redirects", TextSet),
                    PropertySpec::optional("capabilities", TextSet),
                    PropertySpec::optional("restart", Bool),
                ],
                validate: Some(validate_application),
            },
            ResourceTypeSpec {
                name: UnixUser::TYPE,
                category: UnixUser::CATEGORY,
                properties: vec![
                    PropertySpec::required("name", Text),
                    PropertySpec::required("uid", Integer),
                ],
                validate: Some(validate_unix_user),
            },
            ResourceTypeSpec {
                name: WebsiteCertificate::TYPE,
                category: WebsiteCertificate::CATEGORY,
                properties: vec![
                    PropertySpec::required("domain", Text),
                    PropertySpec::optional("subject_names", TextSet),
                    PropertySpec::required("certificate", Text),
                    PropertySpec::required("private_key", Text),
                    PropertySpec::optional("ca_chain", Text),
                    PropertySpec::required("start", Date),
                    PropertySpec::required("end", Date),
                    PropertySpec::required("thumbprint", Text),
                ],
                validate: Some(validate_certificate),
            },
        ]
    }

    fn editors(&self) -> Vec<EditorSpec> {
        vec![EditorSpec {
            name: SELF_SIGNED_EDITOR,
            resource_type: WebsiteCertificate::TYPE,
            description: "Self-signed certificate, renewed before it expires",
        }]
    }

    fn timers(&self) -> Vec<TimerSpec> {
        vec![TimerSpec {
            name: "certificate-renewal".to_string(),
            interval: self.renewal_interval,
            task: Arc::clone(&self.renewal_task),
        }]
    }

    fn application_definitions(
        &self,
        reader: &GraphReader,
        machine: &str,
    ) -> anyhow::Result<Vec<DesiredApplication>> {
        let query = Query::of_type(Machine::TYPE).property_equals("name", machine);
        let Some(host) = reader.find_one(&query)? else {
            log::warn!("Machine {machine} is not in the graph; nothing to run");
            return Ok(Vec::new());
        };
        let machine_id = host.internal_id.context("Machine resource has no id")?;

        let mut desired = Vec::new();
        for resource in reader.find_linked_to(machine_id, LinkType::InstalledOn)? {
            if resource.resource_type != Application::TYPE {
                continue;
            }
            let definition = definition_of(reader, machine_id, &resource)
                .with_context(|| format!("Could not derive a definition from {resource}"))?;
            let mut ctx = OutputContext::new(PLUGIN_NAME, machine);
            if let Some(id) = resource.internal_id {
                ctx = ctx.with_source(id);
            }
            desired.push((ctx, definition));
        }
        Ok(desired)
    }
}

fn definition_of(reader: &GraphReader, machine_id: i64, resource: &Resource) -> anyhow::Result<ApplicationDefinition> {
    let app = Application::try_from_resource(resource)?;
    let app_id = resource.internal_id.context("Application resource has no id")?;

    let mut definition = ApplicationDefinition::new(&app.name, &app.instructions).with_restart(app.restart);
    if let Some(command) = &app.command {
        definition = definition.with_command(command.split_whitespace().map(str::to_string).collect());
    }
    for port in &app.ports {
        definition = definition.with_endpoint(port.host, port.container, port.external);
    }
    for volume in &app.volumes {
        definition.volumes.push(VolumeMount {
            host_path: volume.host.clone().into(),
            container_path: volume.container.clone(),
            read_only: volume.read_only,
        });
    }
    for (key, value) in &app.environment {
        definition = definition.with_env(key, value);
    }
    for redirect in &app.redirects {
        definition = definition.with_redirect(redirect.port, &redirect.target_host, redirect.target_port);
    }
    definition.capabilities = app.capabilities.iter().cloned().collect();

    for user in reader.find_linked_from(app_id, LinkType::RunAs)? {
        if user.resource_type != UnixUser::TYPE {
            continue;
        }
        let user = UnixUser::from_resource(&user)?;
        definition = definition.with_post_start(PostStartAction::Exec(vec![
            "adduser".to_string(),
            "-D".to_string(),
            "-H".to_string(),
            "-u".to_string(),
            user.uid.to_string(),
            user.name,
        ]));
    }

    for used in reader.find_linked_from(app_id, LinkType::Uses)? {
        if used.resource_type == Application::TYPE {
            let Some(name) = used.text("name") else { continue };
            let used_id = used.internal_id.context("Application resource has no id")?;
            if reader.link_exists(used_id, LinkType::InstalledOn, machine_id)? {
                definition = definition.depends_on(name);
            } else {
                log::warn!("{}: dependency {name} runs on another machine; not waiting for it", app.name);
            }
        } else if used.resource_type == WebsiteCertificate::TYPE {
            let certificate = WebsiteCertificate::from_resource(&used)?;
            let base = format!("{CERTIFICATE_DIR}/{}", certificate.domain);
            definition = definition
                .with_post_start(PostStartAction::InjectFile {
                    path: format!("{base}.crt"),
                    content: certificate.full_chain().into_bytes(),
                })
                .with_post_start(PostStartAction::InjectFile {
                    path: format!("{base}.key"),
                    content: certificate.private_key.into_bytes(),
                });
        }
    }

    Ok(definition)
}

// ============================================================================
// Validators
// ============================================================================

fn validate_application(resource: &Resource) -> graphstore::Result<()> {
    let app = Application::from_resource(resource)?;
    if !CONTAINER_NAME_REGEX.is_match(&app.name) {
        return Err(graphstore::Error::validation(format!(
            "'{}' is not a valid container name",
            app.name
        )));
    }
    if app.name.starts_with("infra_redirector_") {
        return Err(graphstore::Error::validation(format!(
            "'{}' is reserved for redirectors",
            app.name
        )));
    }
    Ok(())
}

fn validate_unix_user(resource: &Resource) -> graphstore::Result<()> {
    let user = UnixUser::from_resource(resource)?;
    if !UNIX_USER_REGEX.is_match(&user.name) {
        return Err(graphstore::Error::validation(format!(
            "'{}' is not a valid user name",
            user.name
        )));
    }
    if user.uid < 0 {
        return Err(graphstore::Error::validation(format!(
            "uid of {} must not be negative",
            user.name
        )));
    }
    Ok(())
}

fn validate_certificate(resource: &Resource) -> graphstore::Result<()> {
    let certificate = WebsiteCertificate::from_resource(resource)?;
    if certificate.start > certificate.end {
        return Err(graphstore::Error::validation(format!(
            "certificate for {} ends before it starts",
            certificate.domain
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::load_plugins;
    use declarative::ENTRY_REDIRECTOR;
    use graphstore::{ChangeExecutionEngine, ChangesContext, InMemoryStore};
    use std::collections::BTreeSet;

    fn engine() -> ChangeExecutionEngine {
        let registry = load_plugins(vec![Arc::new(CorePlugin::new(Duration::from_secs(60))) as Arc<dyn Plugin>]).unwrap();
        ChangeExecutionEngine::new(InMemoryStore::new()).with_registry(Arc::new(registry))
    }

    fn machine(name: &str) -> Resource {
        Machine {
            name: name.to_string(),
            address: None,
        }
        .to_resource()
    }

    #[test]
    fn test_definitions_follow_links() {
        let engine = engine();
        let host = machine("web-1");
        let other = machine("web-2");
        let db = Application::new("db", "FROM postgres:16").with_volume("db", "/var/lib/postgresql/data");
        let remote = Application::new("cache", "FROM redis").to_resource();
        let web = Application::new("web", "FROM nginx")
            .with_port(443, 8443, true)
            .with_env("TZ", "UTC");
        let user = UnixUser {
            name: "www".to_string(),
            uid: 2001,
        }
        .to_resource();
        let now = chrono::Utc::now();
        let cert = WebsiteCertificate {
            editor: None,
            domain: "example.com".to_string(),
            subject_names: BTreeSet::new(),
            certificate: "CERT".to_string(),
            private_key: "KEY".to_string(),
            ca_chain: None,
            start: now,
            end: now,
            thumbprint: "t".to_string(),
        }
        .to_resource();
        let (db, web) = (db.to_resource(), web.to_resource());

        let mut changes = ChangesContext::new();
        changes
            .resource_add(host.clone())
            .resource_add(other.clone())
            .resource_add(db.clone())
            .resource_add(remote.clone())
            .resource_add(web.clone())
            .resource_add(user.clone())
            .resource_add(cert.clone())
            .link_add(&db, LinkType::InstalledOn, &host)
            .link_add(&web, LinkType::InstalledOn, &host)
            .link_add(&remote, LinkType::InstalledOn, &other)
            .link_add(&web, LinkType::Uses, &db)
            .link_add(&web, LinkType::Uses, &remote)
            .link_add(&web, LinkType::RunAs, &user)
            .link_add(&web, LinkType::Uses, &cert);
        engine.apply(&mut changes).unwrap();

        let desired = CorePlugin::new(Duration::from_secs(60))
            .application_definitions(&engine.reader(), "web-1")
            .unwrap();
        let names: Vec<_> = desired.iter().map(|(_, d)| d.name.as_str()).collect();
        assert_eq!(names, vec!["db", "web"]);

        let (ctx, web) = &desired[1];
        assert_eq!(ctx.plugin, "core");
        assert_eq!(ctx.machine, "web-1");
        assert!(ctx.source_resource.is_some());
        assert_eq!(web.depends_on, vec!["db".to_string()]);
        assert!(web.needs_entry_redirector());
        assert_eq!(web.environment.get("TZ").map(String::as_str), Some("UTC"));
        assert_eq!(web.post_start.len(), 3);
        assert!(matches!(&web.post_start[0], PostStartAction::Exec(cmd) if cmd.contains(&"2001".to_string())));
        assert!(matches!(
            &web.post_start[1],
            PostStartAction::InjectFile { path, .. } if path == "/etc/ssl/infragraph/example.com.crt"
        ));

        let (_, db) = &desired[0];
        assert_eq!(db.volumes[0].container_path, "/var/lib/postgresql/data");
    }

    #[test]
    fn test_unknown_machine_defines_nothing() {
        let engine = engine();
        let desired = CorePlugin::new(Duration::from_secs(60))
            .application_definitions(&engine.reader(), "nowhere")
            .unwrap();
        assert!(desired.is_empty());
    }

    #[test]
    fn test_invalid_resources_are_rejected_by_the_engine() {
        let engine = engine();

        let mut changes = ChangesContext::new();
        changes.resource_add(Application::new("bad name", "FROM scratch").to_resource());
        assert!(engine.apply(&mut changes).is_err());

        changes.resource_add(Application::new(ENTRY_REDIRECTOR, "FROM scratch").to_resource());
        assert!(engine.apply(&mut changes).is_err());

        changes.resource_add(
            UnixUser {
                name: "Root Admin".to_string(),
                uid: 0,
            }
            .to_resource(),
        );
        assert!(engine.apply(&mut changes).is_err());

        changes.resource_add(Application::new("web", "FROM nginx").to_resource());
        assert!(engine.apply(&mut changes).is_ok());
    }

    #[test]
    fn test_core_plugin_declares_renewal_timer() {
        let plugin = CorePlugin::new(Duration::from_secs(120));
        let timers = plugin.timers();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].name, "certificate-renewal");
        assert_eq!(timers[0].interval, Duration::from_secs(120));
    }
}
