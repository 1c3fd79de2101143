//! Real container backend using `docker` commands.

use crate::backend::ControlPlane;
use crate::error::{Error, Result};
use crate::listing::parse_listing;
use crate::types::{BuildSpec, ExecOutput, FINGERPRINT_LABEL, ObservedContainerState, RunSpec};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const LISTING_FORMAT: &str =
    "table {{.ID}}\t{{.Image}}\t{{.Status}}\t{{.Ports}}\t{{.Names}}";

/// Backend that executes real `docker` commands.
pub struct DockerCli {
    /// Path to the docker executable
    docker_path: String,
    /// Where build contexts are staged
    staging_dir: PathBuf,
}

impl DockerCli {
    /// Create a new DockerCli.
    ///
    /// Returns an error if docker is not installed.
    pub fn new() -> Result<Self> {
        Ok(Self {
            docker_path: find_docker()?,
            staging_dir: std::env::temp_dir().join("infragraph-builds"),
        })
    }

    /// Run a docker command and return output.
    fn run_docker(&self, args: &[&str], stdin: Option<&[u8]>) -> Result<Output> {
        log::debug!("docker {}", args.join(" "));
        let mut command = Command::new(&self.docker_path);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if stdin.is_some() {
            command.stdin(Stdio::piped());
        }

        let mut child = command.spawn().map_err(|e| Error::CommandFailed {
            message: format!("failed to execute docker: {e}"),
            stderr: String::new(),
        })?;
        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input)?;
        }
        Ok(child.wait_with_output()?)
    }

    /// Run a docker command and check for success.
    fn run_docker_checked(&self, args: &[&str], subject: Option<&str>) -> Result<String> {
        self.run_docker_checked_with_input(args, None, subject)
    }

    fn run_docker_checked_with_input(
        &self,
        args: &[&str],
        stdin: Option<&[u8]>,
        subject: Option<&str>,
    ) -> Result<String> {
        let output = self.run_docker(args, stdin)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::from_docker_output(&stderr, subject));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Write the build context to a fresh staging directory.
    fn stage_context(&self, spec: &BuildSpec) -> Result<PathBuf> {
        let dir = self.staging_dir.join(sanitize(&spec.tag));
        if dir.exists() {
            std::fs::remove_dir_all(&dir)?;
        }
        std::fs::create_dir_all(&dir)?;

        for file in &spec.files {
            let target = dir.join(relative(&file.path)?);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, &file.content)?;
        }
        Ok(dir)
    }
}

impl ControlPlane for DockerCli {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn is_available(&self) -> bool {
        self.run_docker_checked(&["version", "--format", "{{.Server.Version}}"], None)
            .is_ok()
    }

    fn list(&self) -> Result<ObservedContainerState> {
        let report =
            self.run_docker_checked(&["ps", "--all", "--no-trunc", "--format", LISTING_FORMAT], None)?;
        parse_listing(&report)
    }

    fn run(&self, spec: &RunSpec) -> Result<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "--detach".into(),
            "--name".into(),
            spec.name.clone(),
        ];
        for (key, value) in &spec.env {
            args.push("--env".into());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            args.push("--volume".into());
            let mode = if mount.read_only { ":ro" } else { "" };
            args.push(format!(
                "{}:{}{mode}",
                mount.host_path.display(),
                mount.container_path
            ));
        }
        for port in &spec.ports {
            args.push("--publish".into());
            args.push(port.publish_arg());
        }
        if let Some(network) = &spec.network {
            args.push("--network".into());
            args.push(network.clone());
        }
        for capability in &spec.capabilities {
            args.push("--cap-add".into());
            args.push(capability.clone());
        }
        for (key, value) in &spec.labels {
            args.push("--label".into());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        args.extend(spec.command.iter().cloned());

        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run_docker_checked(&refs, Some(&spec.name))?;
        Ok(id.trim().to_string())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.run_docker_checked(&["stop", name], Some(name))?;
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<()> {
        self.run_docker_checked(&["rm", "--force", name], Some(name))?;
        Ok(())
    }

    fn build_image(&self, spec: &BuildSpec) -> Result<()> {
        let context = self.stage_context(spec)?;
        let label = format!("{FINGERPRINT_LABEL}={}", spec.fingerprint);
        let context_arg = context.display().to_string();
        let args = [
            "build",
            "--tag",
            spec.tag.as_str(),
            "--label",
            label.as_str(),
            "--file",
            "-",
            context_arg.as_str(),
        ];

        let result = self.run_docker_checked_with_input(
            &args,
            Some(spec.instructions.as_bytes()),
            Some(&spec.tag),
        );
        if let Err(e) = std::fs::remove_dir_all(&context) {
            log::debug!("Could not clean build context {}: {e}", context.display());
        }
        result.map(|_| ())
    }

    fn image_fingerprint(&self, image: &str) -> Result<Option<String>> {
        let output = self.run_docker(
            &["image", "inspect", "--format", "{{json .Config.Labels}}", image],
            None,
        )?;
        if !output.status.success() {
            let err = Error::from_docker_output(&String::from_utf8_lossy(&output.stderr), Some(image));
            return match err {
                Error::NotFound { .. } => Ok(None),
                other => Err(other),
            };
        }

        let labels: Option<BTreeMap<String, String>> = serde_json::from_slice(&output.stdout)?;
        Ok(labels.and_then(|mut l| l.remove(FINGERPRINT_LABEL)))
    }

    fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput> {
        let mut args = vec!["exec", container];
        args.extend(command.iter().map(String::as_str));

        let output = self.run_docker(&args, None)?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() {
            return Err(Error::CommandFailed {
                message: format!("`{}` failed in {container}", command.join(" ")),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(ExecOutput { stdout, stderr })
    }

    fn copy_content(&self, container: &str, path: &str, content: &[u8]) -> Result<()> {
        let script = "mkdir -p \"$(dirname \"$1\")\" && cat > \"$1\"";
        self.run_docker_checked_with_input(
            &["exec", "--interactive", container, "sh", "-c", script, "sh", path],
            Some(content),
            Some(container),
        )?;
        Ok(())
    }
}

/// Find the docker executable.
fn find_docker() -> Result<String> {
    let paths = [
        "/usr/bin/docker",
        "/usr/local/bin/docker",
        "/opt/homebrew/bin/docker",
    ];

    for path in &paths {
        if Path::new(path).exists() {
            return Ok((*path).to_string());
        }
    }

    let output = Command::new("which")
        .arg("docker")
        .output()
        .map_err(|e| Error::DaemonUnavailable {
            message: format!("docker not found: {e}"),
        })?;

    if output.status.success() {
        let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if !path.is_empty() {
            return Ok(path);
        }
    }

    Err(Error::DaemonUnavailable {
        message: "docker executable not found in PATH".to_string(),
    })
}

/// Directory name for an image tag.
fn sanitize(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// Reject context paths escaping the context root.
fn relative(path: &str) -> Result<&Path> {
    let candidate = Path::new(path.trim_start_matches('/'));
    if candidate
        .components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(Error::Other(format!("build file {path} escapes the context")));
    }
    Ok(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_tag() {
        assert_eq!(sanitize("infragraph/web:latest"), "infragraph_web_latest");
    }

    #[test]
    fn test_relative_rejects_parent_dirs() {
        assert_eq!(relative("/etc/app.conf").unwrap(), Path::new("etc/app.conf"));
        assert!(relative("../secret").is_err());
    }

    #[test]
    fn test_stage_context_writes_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let cli = DockerCli {
            docker_path: "docker".to_string(),
            staging_dir: tmp.path().to_path_buf(),
        };
        let spec = BuildSpec {
            tag: "web".to_string(),
            instructions: "FROM scratch\n".to_string(),
            files: vec![crate::types::ContextFile {
                path: "conf/site.conf".to_string(),
                content: b"listen 80;".to_vec(),
            }],
            fingerprint: "abc".to_string(),
        };

        let dir = cli.stage_context(&spec).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join("conf/site.conf")).unwrap(),
            "listen 80;"
        );
    }
}
