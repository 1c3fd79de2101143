//! Typed views of the core resource types.
//!
//! Structured values are stored as text sets with a compact syntax:
//!
//! | property      | entry                           |
//! |---------------|---------------------------------|
//! | `ports`       | `8080:80`, `443:8443/external`  |
//! | `volumes`     | `data:/var/lib/db`, `...:ro`    |
//! | `environment` | `KEY=value`                     |
//! | `redirects`   | `2525:smtp.example.com:25`      |

use chrono::{DateTime, Utc};
use graphstore::{Error, PropertyValue, Resource, ResourceCategory, Result, TypedResource};
use std::collections::{BTreeMap, BTreeSet};

/// Editor of self-signed certificates the renewal timer maintains
pub const SELF_SIGNED_EDITOR: &str = "self-signed-website-certificate";

fn text_set<I, S>(items: I) -> PropertyValue
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    PropertyValue::TextSet(items.into_iter().map(Into::into).collect())
}

fn entries<'a>(resource: &'a Resource, property: &str) -> impl Iterator<Item = &'a String> {
    resource.text_set(property).into_iter().flatten()
}

fn invalid(resource: &Resource, property: &str, entry: &str) -> Error {
    Error::validation(format!("{resource}: invalid {property} entry '{entry}'"))
}

// ============================================================================
// Machine
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Machine {
    pub name: String,
    pub address: Option<String>,
}

impl TypedResource for Machine {
    const TYPE: &'static str = "Machine";
    const CATEGORY: ResourceCategory = ResourceCategory::Infrastructure;

    fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(Self::TYPE, Self::CATEGORY).with_property("name", self.name.as_str());
        if let Some(address) = &self.address {
            resource.set("address", address.as_str());
        }
        resource
    }

    fn from_resource(resource: &Resource) -> Result<Self> {
        Ok(Self {
            name: resource.require_text("name")?.to_string(),
            address: resource.text("address").map(str::to_string),
        })
    }
}

// ============================================================================
// Application
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PortSpec {
    pub host: u16,
    pub container: u16,
    pub external: bool,
}

impl PortSpec {
    fn parse(entry: &str) -> Option<Self> {
        let (ports, external) = match entry.strip_suffix("/external") {
            Some(ports) => (ports, true),
            None => (entry, false),
        };
        let (host, container) = ports.split_once(':')?;
        Some(Self {
            host: host.parse().ok()?,
            container: container.parse().ok()?,
            external,
        })
    }

    fn render(&self) -> String {
        let suffix = if self.external { "/external" } else { "" };
        format!("{}:{}{suffix}", self.host, self.container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VolumeSpec {
    pub host: String,
    pub container: String,
    pub read_only: bool,
}

impl VolumeSpec {
    fn parse(entry: &str) -> Option<Self> {
        let (rest, read_only) = match entry.strip_suffix(":ro") {
            Some(rest) => (rest, true),
            None => (entry, false),
        };
        let (host, container) = rest.split_once(':')?;
        if host.is_empty() || !container.starts_with('/') {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            container: container.to_string(),
            read_only,
        })
    }

    fn render(&self) -> String {
        let suffix = if self.read_only { ":ro" } else { "" };
        format!("{}:{}{suffix}", self.host, self.container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RedirectSpec {
    pub port: u16,
    pub target_host: String,
    pub target_port: u16,
}

impl RedirectSpec {
    fn parse(entry: &str) -> Option<Self> {
        let (port, rest) = entry.split_once(':')?;
        let (target_host, target_port) = rest.rsplit_once(':')?;
        if target_host.is_empty() {
            return None;
        }
        Some(Self {
            port: port.parse().ok()?,
            target_host: target_host.to_string(),
            target_port: target_port.parse().ok()?,
        })
    }

    fn render(&self) -> String {
        format!("{}:{}:{}", self.port, self.target_host, self.target_port)
    }
}

/// A containerized application.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Application {
    pub name: String,
    /// Build instructions of its image
    pub instructions: String,
    /// Whitespace-separated command override
    pub command: Option<String>,
    pub ports: BTreeSet<PortSpec>,
    pub volumes: BTreeSet<VolumeSpec>,
    pub environment: BTreeMap<String, String>,
    pub redirects: BTreeSet<RedirectSpec>,
    pub capabilities: BTreeSet<String>,
    pub restart: bool,
}

impl Application {
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            ..Self::default()
        }
    }

    pub fn with_port(mut self, host: u16, container: u16, external: bool) -> Self {
        self.ports.insert(PortSpec {
            host,
            container,
            external,
        });
        self
    }

    pub fn with_volume(mut self, host: impl Into<String>, container: impl Into<String>) -> Self {
        self.volumes.insert(VolumeSpec {
            host: host.into(),
            container: container.into(),
            read_only: false,
        });
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    pub fn with_redirect(mut self, port: u16, target_host: impl Into<String>, target_port: u16) -> Self {
        self.redirects.insert(RedirectSpec {
            port,
            target_host: target_host.into(),
            target_port,
        });
        self
    }
}

impl TypedResource for Application {
    const TYPE: &'static str = "Application";
    const CATEGORY: ResourceCategory = ResourceCategory::Application;

    fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(Self::TYPE, Self::CATEGORY)
            .with_property("name", self.name.as_str())
            .with_property("instructions", self.instructions.as_str());
        if let Some(command) = &self.command {
            resource.set("command", command.as_str());
        }
        if !self.ports.is_empty() {
            resource.set("ports", text_set(self.ports.iter().map(PortSpec::render)));
        }
        if !self.volumes.is_empty() {
            resource.set("volumes", text_set(self.volumes.iter().map(VolumeSpec::render)));
        }
        if !self.environment.is_empty() {
            resource.set(
                "environment",
                text_set(self.environment.iter().map(|(k, v)| format!("{k}={v}"))),
            );
        }
        if !self.redirects.is_empty() {
            resource.set("redirects", text_set(self.redirects.iter().map(RedirectSpec::render)));
        }
        if !self.capabilities.is_empty() {
            resource.set("capabilities", text_set(self.capabilities.iter().cloned()));
        }
        if self.restart {
            resource.set("restart", true);
        }
        resource
    }

    fn from_resource(resource: &Resource) -> Result<Self> {
        let mut ports = BTreeSet::new();
        for entry in entries(resource, "ports") {
            ports.insert(PortSpec::parse(entry).ok_or_else(|| invalid(resource, "ports", entry))?);
        }
        let mut volumes = BTreeSet::new();
        for entry in entries(resource, "volumes") {
            volumes.insert(VolumeSpec::parse(entry).ok_or_else(|| invalid(resource, "volumes", entry))?);
        }
        let mut environment = BTreeMap::new();
        for entry in entries(resource, "environment") {
            let (key, value) = entry
                .split_once('=')
                .filter(|(key, _)| !key.is_empty())
                .ok_or_else(|| invalid(resource, "environment", entry))?;
            environment.insert(key.to_string(), value.to_string());
        }
        let mut redirects = BTreeSet::new();
        for entry in entries(resource, "redirects") {
            redirects.insert(RedirectSpec::parse(entry).ok_or_else(|| invalid(resource, "redirects", entry))?);
        }

        Ok(Self {
            name: resource.require_text("name")?.to_string(),
            instructions: resource.require_text("instructions")?.to_string(),
            command: resource.text("command").map(str::to_string),
            ports,
            volumes,
            environment,
            redirects,
            capabilities: entries(resource, "capabilities").cloned().collect(),
            restart: resource.bool("restart").unwrap_or(false),
        })
    }
}

// ============================================================================
// UnixUser
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnixUser {
    pub name: String,
    pub uid: i64,
}

impl TypedResource for UnixUser {
    const TYPE: &'static str = "UnixUser";
    const CATEGORY: ResourceCategory = ResourceCategory::Security;

    fn to_resource(&self) -> Resource {
        Resource::new(Self::TYPE, Self::CATEGORY)
            .with_property("name", self.name.as_str())
            .with_property("uid", self.uid)
    }

    fn from_resource(resource: &Resource) -> Result<Self> {
        Ok(Self {
            name: resource.require_text("name")?.to_string(),
            uid: resource
                .integer("uid")
                .ok_or_else(|| Error::validation(format!("{resource} is missing integer property 'uid'")))?,
        })
    }
}

// ============================================================================
// WebsiteCertificate
// ============================================================================

/// TLS certificate of a website, with its key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsiteCertificate {
    pub editor: Option<String>,
    /// Primary domain
    pub domain: String,
    pub subject_names: BTreeSet<String>,
    /// PEM
    pub certificate: String,
    /// PEM
    pub private_key: String,
    /// PEM, when issued by an intermediate
    pub ca_chain: Option<String>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub thumbprint: String,
}

impl WebsiteCertificate {
    /// Certificate followed by its chain.
    pub fn full_chain(&self) -> String {
        match &self.ca_chain {
            Some(chain) => format!("{}\n{chain}", self.certificate.trim_end()),
            None => self.certificate.clone(),
        }
    }
}

impl TypedResource for WebsiteCertificate {
    const TYPE: &'static str = "WebsiteCertificate";
    const CATEGORY: ResourceCategory = ResourceCategory::Security;

    fn to_resource(&self) -> Resource {
        let mut resource = Resource::new(Self::TYPE, Self::CATEGORY)
            .with_property("domain", self.domain.as_str())
            .with_property("subject_names", PropertyValue::TextSet(self.subject_names.clone()))
            .with_property("certificate", self.certificate.as_str())
            .with_property("private_key", self.private_key.as_str())
            .with_property("start", self.start)
            .with_property("end", self.end)
            .with_property("thumbprint", self.thumbprint.as_str());
        if let Some(chain) = &self.ca_chain {
            resource.set("ca_chain", chain.as_str());
        }
        if let Some(editor) = &self.editor {
            resource = resource.with_editor(editor.as_str());
        }
        resource
    }

    fn from_resource(resource: &Resource) -> Result<Self> {
        Ok(Self {
            editor: resource.editor_name.clone(),
            domain: resource.require_text("domain")?.to_string(),
            subject_names: resource.text_set("subject_names").cloned().unwrap_or_default(),
            certificate: resource.require_text("certificate")?.to_string(),
            private_key: resource.require_text("private_key")?.to_string(),
            ca_chain: resource.text("ca_chain").map(str::to_string),
            start: resource.require_date("start")?,
            end: resource.require_date("end")?,
            thumbprint: resource.require_text("thumbprint")?.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_survives_the_store_form() {
        let app = Application::new("web", "FROM nginx")
            .with_port(443, 8443, true)
            .with_port(8080, 80, false)
            .with_volume("web/cache", "/var/cache/nginx")
            .with_env("TZ", "UTC")
            .with_redirect(2525, "smtp.example.com", 25);

        let resource = app.to_resource();
        assert_eq!(resource.resource_type, "Application");
        assert!(resource.text_set("ports").unwrap().contains("443:8443/external"));
        assert_eq!(Application::try_from_resource(&resource).unwrap(), app);
    }

    #[test]
    fn test_malformed_entries_are_rejected() {
        let resource = Application::new("web", "FROM nginx")
            .to_resource()
            .with_property("ports", text_set(["80"]));
        assert!(Application::from_resource(&resource).is_err());

        let resource = Application::new("web", "FROM nginx")
            .to_resource()
            .with_property("volumes", text_set(["data:relative"]));
        assert!(Application::from_resource(&resource).is_err());
    }

    #[test]
    fn test_redirect_host_may_contain_colons() {
        let spec = RedirectSpec::parse("5353:fd00::1:53").unwrap();
        assert_eq!(spec.target_host, "fd00::1");
        assert_eq!(spec.target_port, 53);
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let machine = Machine {
            name: "h1".to_string(),
            address: None,
        }
        .to_resource();
        assert!(UnixUser::try_from_resource(&machine).is_err());
    }

    #[test]
    fn test_full_chain_appends_ca() {
        let now = Utc::now();
        let cert = WebsiteCertificate {
            editor: None,
            domain: "example.com".to_string(),
            subject_names: BTreeSet::new(),
            certificate: "CERT\n".to_string(),
            private_key: "KEY".to_string(),
            ca_chain: Some("CA".to_string()),
            start: now,
            end: now,
            thumbprint: "t".to_string(),
        };
        assert_eq!(cert.full_chain(), "CERT\nCA");
    }
}
