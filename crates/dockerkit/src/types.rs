//! Core types for container control.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Image label carrying the build-context fingerprint.
pub const FINGERPRINT_LABEL: &str = "infragraph.fingerprint";

/// Lifecycle state of a container, as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    /// Status text we do not recognize
    Unknown(String),
}

impl ContainerStatus {
    /// Interpret the STATUS column of a listing, e.g. `Up 2 hours` or
    /// `Exited (0) 3 minutes ago`.
    pub fn from_report(text: &str) -> Self {
        let lower = text.trim().to_lowercase();
        if lower.starts_with("up") {
            if lower.contains("(paused)") {
                Self::Paused
            } else {
                Self::Running
            }
        } else if lower.starts_with("exited") {
            Self::Exited
        } else if lower.starts_with("created") {
            Self::Created
        } else if lower.starts_with("restarting") {
            Self::Restarting
        } else if lower.starts_with("removal") {
            Self::Removing
        } else if lower.starts_with("dead") {
            Self::Dead
        } else {
            Self::Unknown(text.trim().to_string())
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Restarting => write!(f, "restarting"),
            Self::Removing => write!(f, "removing"),
            Self::Exited => write!(f, "exited"),
            Self::Dead => write!(f, "dead"),
            Self::Unknown(s) => write!(f, "unknown ({s})"),
        }
    }
}

/// A published or exposed port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host address, when published
    pub host_ip: Option<String>,
    /// Host port, when published
    pub host_port: Option<u16>,
    pub container_port: u16,
    /// `tcp` or `udp`
    pub protocol: String,
}

impl PortBinding {
    /// Publish `container_port` on the same host port, all interfaces.
    pub fn published(host_port: u16, container_port: u16) -> Self {
        Self {
            host_ip: None,
            host_port: Some(host_port),
            container_port,
            protocol: "tcp".to_string(),
        }
    }

    /// Parse the PORTS column, e.g. `0.0.0.0:8080->80/tcp, :::8080->80/tcp, 443/tcp`.
    ///
    /// Unparseable entries are skipped.
    pub fn parse_list(text: &str) -> Vec<Self> {
        text.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(Self::parse_one)
            .collect()
    }

    fn parse_one(entry: &str) -> Option<Self> {
        let (host, container) = match entry.split_once("->") {
            Some((host, container)) => (Some(host), container),
            None => (None, entry),
        };

        let (port, protocol) = container.split_once('/').unwrap_or((container, "tcp"));
        // Ranges like `8000-8010/tcp` keep their first port
        let container_port = port.split('-').next()?.parse().ok()?;

        let (host_ip, host_port) = match host {
            Some(host) => {
                let (ip, port) = host.rsplit_once(':')?;
                let ip = if ip.is_empty() { None } else { Some(ip.to_string()) };
                (ip, port.split('-').next()?.parse().ok())
            }
            None => (None, None),
        };

        Some(Self {
            host_ip,
            host_port,
            container_port,
            protocol: protocol.to_string(),
        })
    }

    /// Argument of `docker run --publish`.
    pub fn publish_arg(&self) -> String {
        let mut arg = String::new();
        if let Some(ip) = &self.host_ip {
            arg.push_str(ip);
            arg.push(':');
        }
        if let Some(port) = self.host_port {
            arg.push_str(&port.to_string());
            arg.push(':');
        }
        arg.push_str(&format!("{}/{}", self.container_port, self.protocol));
        arg
    }
}

/// One container as observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub name: String,
    pub id: String,
    pub image: String,
    pub status: ContainerStatus,
    pub ports: Vec<PortBinding>,
}

/// Snapshot of every container known to the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedContainerState {
    containers: Vec<ContainerRecord>,
}

impl ObservedContainerState {
    pub fn new(containers: Vec<ContainerRecord>) -> Self {
        Self { containers }
    }

    pub fn by_name(&self, name: &str) -> Option<&ContainerRecord> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Lookup by full id or by an unambiguous prefix of it.
    pub fn by_id(&self, id: &str) -> Option<&ContainerRecord> {
        if id.is_empty() {
            return None;
        }
        let mut matches = self.containers.iter().filter(|c| c.id.starts_with(id));
        match (matches.next(), matches.next()) {
            (Some(found), None) => Some(found),
            _ => self.containers.iter().find(|c| c.id == id),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContainerRecord> {
        self.containers.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.containers.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.containers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}

/// A host directory mounted into a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host_path: PathBuf,
    pub container_path: String,
    pub read_only: bool,
}

/// Everything needed to start a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    pub env: BTreeMap<String, String>,
    /// Overrides the image command when not empty
    pub command: Vec<String>,
    pub mounts: Vec<Mount>,
    pub ports: Vec<PortBinding>,
    pub network: Option<String>,
    /// Extra privileges some containers (port redirectors) need
    pub capabilities: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

/// A file placed in a build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextFile {
    /// Path relative to the context root
    pub path: String,
    pub content: Vec<u8>,
}

/// Everything needed to build an image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildSpec {
    /// Tag of the resulting image
    pub tag: String,
    /// Build instructions (Dockerfile text)
    pub instructions: String,
    /// Files to place in the context
    pub files: Vec<ContextFile>,
    /// Fingerprint recorded under [`FINGERPRINT_LABEL`]
    pub fingerprint: String,
}

/// Output of a command run inside a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_report() {
        assert_eq!(ContainerStatus::from_report("Up 2 hours"), ContainerStatus::Running);
        assert_eq!(
            ContainerStatus::from_report("Up 5 seconds (Paused)"),
            ContainerStatus::Paused
        );
        assert_eq!(
            ContainerStatus::from_report("Exited (137) 3 minutes ago"),
            ContainerStatus::Exited
        );
        assert_eq!(ContainerStatus::from_report("Created"), ContainerStatus::Created);
        assert!(matches!(
            ContainerStatus::from_report("Weird"),
            ContainerStatus::Unknown(_)
        ));
    }

    #[test]
    fn test_parse_ports() {
        let ports = PortBinding::parse_list("0.0.0.0:8080->80/tcp, :::8443->443/tcp, 53/udp");
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[0].host_ip.as_deref(), Some("0.0.0.0"));
        assert_eq!(ports[0].host_port, Some(8080));
        assert_eq!(ports[0].container_port, 80);
        assert_eq!(ports[1].host_ip.as_deref(), Some("::"));
        assert_eq!(ports[1].host_port, Some(8443));
        assert_eq!(ports[2].host_port, None);
        assert_eq!(ports[2].protocol, "udp");
        assert!(PortBinding::parse_list("").is_empty());
    }

    #[test]
    fn test_publish_arg() {
        assert_eq!(PortBinding::published(8080, 80).publish_arg(), "8080:80/tcp");
    }

    #[test]
    fn test_lookup_by_id_prefix() {
        let record = |name: &str, id: &str| ContainerRecord {
            name: name.to_string(),
            id: id.to_string(),
            image: "img".to_string(),
            status: ContainerStatus::Running,
            ports: Vec::new(),
        };
        let state = ObservedContainerState::new(vec![record("a", "abc123"), record("b", "abd456")]);

        assert_eq!(state.by_id("abc").map(|c| c.name.as_str()), Some("a"));
        assert!(state.by_id("ab").is_none());
        assert_eq!(state.by_name("b").map(|c| c.id.as_str()), Some("abd456"));
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig::new(5, Duration::from_secs(2), 2.0);
        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(60));
    }
}
