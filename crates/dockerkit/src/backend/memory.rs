//! In-memory container runtime.
//!
//! Simulates containers and images without touching a daemon. Every mutating
//! call is recorded as an [`Action`], which makes convergence and idempotence
//! easy to assert, and backs `--simulate` runs.

use crate::backend::ControlPlane;
use crate::error::{Error, Result};
use crate::types::{
    BuildSpec, ContainerRecord, ContainerStatus, ExecOutput, ObservedContainerState, RunSpec,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

/// A mutating call received by the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Run(String),
    Stop(String),
    Remove(String),
    Build(String),
    Exec { container: String, command: Vec<String> },
    Copy { container: String, path: String },
}

impl Action {
    /// Container or image the action applies to.
    pub fn target(&self) -> &str {
        match self {
            Action::Run(name) | Action::Stop(name) | Action::Remove(name) | Action::Build(name) => name,
            Action::Exec { container, .. } | Action::Copy { container, .. } => container,
        }
    }
}

#[derive(Debug, Clone)]
struct SimContainer {
    record: ContainerRecord,
    files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct SimState {
    containers: BTreeMap<String, SimContainer>,
    /// Image tag to fingerprint label
    images: BTreeMap<String, Option<String>>,
    actions: Vec<Action>,
    failing: BTreeSet<String>,
    next_id: u64,
}

/// Control plane simulated in process memory.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<SimState>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panic while holding the lock leaves plain data behind; keep going
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Seed a container as if it had been started outside the reconciler.
    pub fn insert_container(&self, record: ContainerRecord) {
        self.lock().containers.insert(
            record.name.clone(),
            SimContainer {
                record,
                files: BTreeMap::new(),
            },
        );
    }

    /// Seed an image with an optional fingerprint label.
    pub fn insert_image(&self, tag: &str, fingerprint: Option<&str>) {
        self.lock()
            .images
            .insert(tag.to_string(), fingerprint.map(str::to_string));
    }

    /// Force the status of a container, e.g. to simulate a crash.
    pub fn set_status(&self, name: &str, status: ContainerStatus) {
        if let Some(container) = self.lock().containers.get_mut(name) {
            container.record.status = status;
        }
    }

    /// Make every later call touching `target` fail.
    pub fn fail_on(&self, target: &str) {
        self.lock().failing.insert(target.to_string());
    }

    /// Calls received so far.
    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.lock().actions.clear();
    }

    /// Content written into a container by [`ControlPlane::copy_content`].
    pub fn file_content(&self, container: &str, path: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(container)
            .and_then(|c| c.files.get(path).cloned())
    }

    fn record(state: &mut SimState, action: Action) -> Result<()> {
        let failing = state.failing.contains(action.target());
        state.actions.push(action.clone());
        if failing {
            return Err(Error::CommandFailed {
                message: format!("simulated failure: {action:?}"),
                stderr: String::new(),
            });
        }
        Ok(())
    }

    fn running<'a>(state: &'a mut SimState, name: &str) -> Result<&'a mut SimContainer> {
        match state.containers.get_mut(name) {
            Some(c) if c.record.status.is_running() => Ok(c),
            Some(_) => Err(Error::Conflict {
                message: format!("container {name} is not running"),
            }),
            None => Err(Error::NotFound {
                name: name.to_string(),
            }),
        }
    }
}

impl ControlPlane for InMemoryControlPlane {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn list(&self) -> Result<ObservedContainerState> {
        Ok(ObservedContainerState::new(
            self.lock()
                .containers
                .values()
                .map(|c| c.record.clone())
                .collect(),
        ))
    }

    fn run(&self, spec: &RunSpec) -> Result<String> {
        let mut state = self.lock();
        Self::record(&mut state, Action::Run(spec.name.clone()))?;
        if state.containers.contains_key(&spec.name) {
            return Err(Error::Conflict {
                message: format!("container name {} is already in use", spec.name),
            });
        }
        if !state.images.contains_key(&spec.image) {
            return Err(Error::NotFound {
                name: spec.image.clone(),
            });
        }

        state.next_id += 1;
        let id = format!("{:012x}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            SimContainer {
                record: ContainerRecord {
                    name: spec.name.clone(),
                    id: id.clone(),
                    image: spec.image.clone(),
                    status: ContainerStatus::Running,
                    ports: spec.ports.clone(),
                },
                files: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    fn stop(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Action::Stop(name.to_string()))?;
        match state.containers.get_mut(name) {
            Some(container) => {
                container.record.status = ContainerStatus::Exited;
                Ok(())
            }
            None => Err(Error::NotFound {
                name: name.to_string(),
            }),
        }
    }

    fn remove(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Action::Remove(name.to_string()))?;
        state
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                name: name.to_string(),
            })
    }

    fn build_image(&self, spec: &BuildSpec) -> Result<()> {
        let mut state = self.lock();
        Self::record(&mut state, Action::Build(spec.tag.clone()))?;
        state
            .images
            .insert(spec.tag.clone(), Some(spec.fingerprint.clone()));
        Ok(())
    }

    fn image_fingerprint(&self, image: &str) -> Result<Option<String>> {
        Ok(self.lock().images.get(image).cloned().flatten())
    }

    fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            Action::Exec {
                container: container.to_string(),
                command: command.to_vec(),
            },
        )?;
        Self::running(&mut state, container)?;
        Ok(ExecOutput::default())
    }

    fn copy_content(&self, container: &str, path: &str, content: &[u8]) -> Result<()> {
        let mut state = self.lock();
        Self::record(
            &mut state,
            Action::Copy {
                container: container.to_string(),
                path: path.to_string(),
            },
        )?;
        Self::running(&mut state, container)?
            .files
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, image: &str) -> RunSpec {
        RunSpec {
            name: name.to_string(),
            image: image.to_string(),
            ..RunSpec::default()
        }
    }

    #[test]
    fn test_run_requires_image() {
        let plane = InMemoryControlPlane::new();
        assert!(matches!(
            plane.run(&spec("web", "web:latest")),
            Err(Error::NotFound { .. })
        ));

        plane.insert_image("web:latest", None);
        plane.run(&spec("web", "web:latest")).unwrap();
        assert!(plane.status("web").unwrap().unwrap().is_running());
    }

    #[test]
    fn test_build_records_fingerprint() {
        let plane = InMemoryControlPlane::new();
        plane
            .build_image(&BuildSpec {
                tag: "web:latest".to_string(),
                fingerprint: "f1".to_string(),
                ..BuildSpec::default()
            })
            .unwrap();
        assert_eq!(
            plane.image_fingerprint("web:latest").unwrap().as_deref(),
            Some("f1")
        );
        assert_eq!(plane.image_fingerprint("other").unwrap(), None);
    }

    #[test]
    fn test_copy_needs_running_container() {
        let plane = InMemoryControlPlane::new();
        plane.insert_image("img", None);
        plane.run(&spec("web", "img")).unwrap();
        plane.copy_content("web", "/etc/a", b"x").unwrap();
        assert_eq!(plane.file_content("web", "/etc/a"), Some(b"x".to_vec()));

        plane.stop("web").unwrap();
        assert!(plane.copy_content("web", "/etc/a", b"y").is_err());
    }

    #[test]
    fn test_injected_failure() {
        let plane = InMemoryControlPlane::new();
        plane.insert_image("img", None);
        plane.fail_on("web");
        assert!(plane.run(&spec("web", "img")).is_err());
        assert_eq!(plane.actions(), vec![Action::Run("web".to_string())]);
    }
}
