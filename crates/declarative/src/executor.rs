//! Convergence engine - brings desired containers to their target state
//!
//! Containers of one dependency level converge in parallel on a rayon pool.
//! Each container walks the same steps: volumes, fingerprint, build when the
//! image label differs, start when needed, post-start actions.

use crate::context::{ObserverDecision, ReconcileObserver};
use crate::error::{InfrastructureError, Stage};
use crate::fingerprint::{fingerprint, materialize};
use crate::types::{
    ApplicationDefinition, ContainerOutcome, DesiredApplication, OutputContext, PostStartAction,
    ReconcileOptions,
};
use crate::volumes::ensure_volumes;
use dockerkit::{
    BuildSpec, ContainerRecord, ControlPlane, FINGERPRINT_LABEL, LogCallback, Mount,
    ObservedContainerState, PortBinding, RunSpec, with_retry,
};
use rayon::prelude::*;
use std::collections::HashSet;
use std::time::Instant;

/// What earlier levels of the pass did.
#[derive(Debug, Default)]
pub(crate) struct PassState {
    /// Started or restarted during this pass
    pub restarted: HashSet<String>,
    /// Failed, or skipped because a dependency failed
    pub blocked: HashSet<String>,
}

impl PassState {
    pub fn record(&mut self, name: &str, outcome: &ContainerOutcome) {
        match outcome {
            ContainerOutcome::Started { .. } => {
                self.restarted.insert(name.to_string());
            }
            ContainerOutcome::Failed(_) => {
                self.blocked.insert(name.to_string());
            }
            ContainerOutcome::Skipped { .. } | ContainerOutcome::Unchanged => {}
        }
    }
}

/// How one container ended up, and whether its image was built on the way.
#[derive(Debug)]
pub(crate) struct Converged {
    pub name: String,
    pub outcome: ContainerOutcome,
    /// Also set when the start was vetoed or failed after the build
    pub built: bool,
}

/// Shared, read-only inputs of a pass.
pub(crate) struct Convergence<'a> {
    pub control: &'a dyn ControlPlane,
    pub observer: &'a dyn ReconcileObserver,
    pub options: &'a ReconcileOptions,
    pub observed: &'a ObservedContainerState,
}

impl Convergence<'_> {
    /// Converge one level in parallel. Results keep the order of `level`.
    pub fn converge_level(
        &self,
        pool: &rayon::ThreadPool,
        desired: &[DesiredApplication],
        level: &[usize],
        state: &mut PassState,
    ) -> Vec<Converged> {
        let snapshot: &PassState = state;
        let results: Vec<(usize, (ContainerOutcome, bool))> = pool.install(|| {
            level
                .par_iter()
                .map(|index| {
                    let (ctx, definition) = &desired[*index];
                    (*index, self.converge_one(ctx, definition, snapshot))
                })
                .collect()
        });

        let mut named = Vec::with_capacity(results.len());
        for (index, (outcome, built)) in results {
            let definition = &desired[index].1;
            // Skipped because of a failed dependency blocks dependents too
            if matches!(outcome, ContainerOutcome::Skipped { .. })
                && blocking_dependency(definition, state).is_some()
            {
                state.blocked.insert(definition.name.clone());
            }
            state.record(&definition.name, &outcome);
            named.push(Converged {
                name: definition.name.clone(),
                outcome,
                built,
            });
        }
        named
    }

    fn converge_one(
        &self,
        ctx: &OutputContext,
        definition: &ApplicationDefinition,
        state: &PassState,
    ) -> (ContainerOutcome, bool) {
        let name = definition.name.as_str();

        if let Some(dependency) = blocking_dependency(definition, state) {
            log::warn!("Skipping {name}: dependency {dependency} failed");
            let outcome = ContainerOutcome::Skipped {
                reason: format!("dependency {dependency} failed"),
            };
            return (outcome, false);
        }

        let mut built = false;
        let outcome = match self.try_converge(ctx, definition, state, &mut built) {
            Ok(outcome) => outcome,
            Err(error) => {
                log::error!("{error}");
                ContainerOutcome::Failed(error)
            }
        };
        (outcome, built)
    }

    fn try_converge(
        &self,
        ctx: &OutputContext,
        definition: &ApplicationDefinition,
        state: &PassState,
        built: &mut bool,
    ) -> Result<ContainerOutcome, InfrastructureError> {
        let name = definition.name.as_str();
        let fail = |stage: Stage| move |e: dockerkit::Error| InfrastructureError::new(name, stage, e);

        let mounts = ensure_volumes(&self.options.volumes_root, &definition.volumes)
            .map_err(|e| InfrastructureError::new(name, Stage::Volumes, e))?;

        let files = materialize(&definition.build)
            .map_err(|e| InfrastructureError::new(name, Stage::Build, e))?;
        let fingerprint = fingerprint(&definition.build.instructions, &files);

        if let ObserverDecision::Veto { reason } =
            self.observer
                .after_definition_transformed(ctx, definition, &fingerprint)
        {
            log::info!("Definition of {name} vetoed: {reason}");
            return Ok(ContainerOutcome::Skipped { reason });
        }

        let image = self.options.image_tag(name);
        let current = self
            .control
            .image_fingerprint(&image)
            .map_err(fail(Stage::Build))?;
        let rebuilt = current.as_deref() != Some(fingerprint.as_str());
        if rebuilt {
            log::info!("Building {image}");
            let spec = BuildSpec {
                tag: image.clone(),
                instructions: definition.build.instructions.clone(),
                files,
                fingerprint: fingerprint.clone(),
            };
            let operation = format!("build {image}");
            let callback = LogCallback {
                operation: &operation,
            };
            with_retry(&self.options.retry, Some(&callback), || {
                self.control.build_image(&spec)
            })
            .map_err(fail(Stage::Build))?;
            *built = true;
        }

        let existing = self.observed.by_name(name);
        if let ObserverDecision::Veto { reason } =
            self.observer
                .after_container_name_resolved(ctx, name, existing)
        {
            log::info!("Container {name} vetoed: {reason}");
            return Ok(ContainerOutcome::Skipped { reason });
        }

        let Some(reason) = start_reason(definition, existing, &image, rebuilt, state) else {
            log::debug!("{name} is up to date");
            return Ok(ContainerOutcome::Unchanged);
        };
        log::info!("Starting {name}: {reason}");

        if let Some(existing) = existing {
            if existing.status.is_running() {
                self.control.stop(name).map_err(fail(Stage::Start))?;
            }
            self.control.remove(name).map_err(fail(Stage::Start))?;
        }

        let spec = self.run_spec(definition, image, mounts, &fingerprint);
        let operation = format!("start {name}");
        let callback = LogCallback {
            operation: &operation,
        };
        with_retry(&self.options.retry, Some(&callback), || self.control.run(&spec))
            .map_err(fail(Stage::Start))?;
        self.wait_running(name)?;

        for action in &definition.post_start {
            self.post_start(name, action)
                .map_err(fail(Stage::PostStart))?;
        }

        Ok(ContainerOutcome::Started { rebuilt })
    }

    fn run_spec(
        &self,
        definition: &ApplicationDefinition,
        image: String,
        mounts: Vec<Mount>,
        fingerprint: &str,
    ) -> RunSpec {
        RunSpec {
            name: definition.name.clone(),
            image,
            env: definition.environment.clone(),
            command: definition.command.clone(),
            mounts,
            // External endpoints are published by the entry redirector
            ports: definition
                .endpoints
                .iter()
                .filter(|e| !e.external)
                .map(|e| PortBinding::published(e.host_port, e.container_port))
                .collect(),
            network: self.options.network.clone(),
            capabilities: definition.capabilities.clone(),
            labels: [(FINGERPRINT_LABEL.to_string(), fingerprint.to_string())]
                .into_iter()
                .collect(),
        }
    }

    /// Poll until the container reports running or the start timeout passes.
    fn wait_running(&self, name: &str) -> Result<(), InfrastructureError> {
        let started = Instant::now();
        loop {
            let status = self
                .control
                .status(name)
                .map_err(|e| InfrastructureError::new(name, Stage::Start, e))?;
            if status.as_ref().is_some_and(|s| s.is_running()) {
                return Ok(());
            }
            if started.elapsed() >= self.options.start_timeout {
                let status = status.map_or_else(|| "missing".to_string(), |s| s.to_string());
                return Err(InfrastructureError::new(
                    name,
                    Stage::Start,
                    format!(
                        "not running after {}s (status: {status})",
                        self.options.start_timeout.as_secs()
                    ),
                ));
            }
            std::thread::sleep(self.options.poll_interval);
        }
    }

    fn post_start(&self, name: &str, action: &PostStartAction) -> dockerkit::Result<()> {
        match action {
            PostStartAction::Exec(command) => {
                log::debug!("{name}: exec {}", command.join(" "));
                self.control.exec(name, command)?;
            }
            PostStartAction::InjectFile { path, content } => {
                log::debug!("{name}: inject {path}");
                self.control.copy_content(name, path, content)?;
            }
        }
        Ok(())
    }
}

fn blocking_dependency<'a>(definition: &'a ApplicationDefinition, state: &PassState) -> Option<&'a str> {
    definition
        .depends_on
        .iter()
        .find(|dep| state.blocked.contains(dep.as_str()))
        .map(String::as_str)
}

/// Why a container must be (re)started, `None` when it can stay as is.
fn start_reason(
    definition: &ApplicationDefinition,
    existing: Option<&ContainerRecord>,
    image: &str,
    rebuilt: bool,
    state: &PassState,
) -> Option<String> {
    let Some(existing) = existing else {
        return Some("no instance".to_string());
    };
    if !existing.status.is_running() {
        return Some(format!("instance is {}", existing.status));
    }
    if rebuilt {
        return Some("image rebuilt".to_string());
    }
    if definition.restart {
        return Some("restart requested".to_string());
    }
    if existing.image != image {
        return Some(format!("runs image {}", existing.image));
    }
    definition
        .depends_on
        .iter()
        .find(|dep| state.restarted.contains(dep.as_str()))
        .map(|dep| format!("dependency {dep} restarted"))
}
