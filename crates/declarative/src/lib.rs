//! # Declarative
//!
//! Converges running containers onto a desired set of application definitions.
//!
//! This crate diffs an observed container state against the definitions
//! plugins derive from the resource graph, and performs the minimal,
//! dependency-ordered sequence of builds, starts and restarts to converge.
//!
//! ## Core Concepts
//!
//! - **ApplicationDefinition**: build context, volumes, environment, ports,
//!   start dependencies and post-start steps of one container
//! - **Fingerprint**: blake3 hash of a build context, stored as an image label;
//!   a mismatch triggers a rebuild
//! - **Dependency levels**: containers whose dependencies are all in earlier
//!   levels; one level converges in parallel
//! - **Redirectors**: `infra_redirector_entry` and `infra_redirector_exit`,
//!   provisioned on demand and started before anything that needs them
//!
//! ## Example
//!
//! ```no_run
//! use declarative::{
//!     ApplicationDefinition, ContainerStateReconciler, NoProgress, OutputContext,
//!     ReconcileOptions,
//! };
//! use std::sync::Arc;
//!
//! let docker = Arc::new(dockerkit::default_backend()?);
//! let reconciler = ContainerStateReconciler::new(docker, ReconcileOptions::default());
//!
//! let desired = vec![(
//!     OutputContext::new("core", "web-1"),
//!     ApplicationDefinition::new("web", "FROM nginx:1.27").with_endpoint(443, 443, true),
//! )];
//!
//! let observed = reconciler.observe()?;
//! let summary = reconciler.reconcile(&observed, desired, &mut NoProgress)?;
//! println!("{} started", summary.started.len());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Provider Traits
//!
//! - [`ReconcileObserver`]: may veto a container at two points of a pass
//! - [`AlertSink`]: receives per-container failures
//! - [`ProgressCallback`]: receives progress updates

pub mod context;
mod error;
mod executor;
pub mod fingerprint;
pub mod planner;
pub mod reconciler;
pub mod redirector;
pub mod types;
pub mod volumes;

// Re-export main types at crate root
pub use context::{
    AlertSink, NoAlerts, NoProgress, NoopObserver, ObserverDecision, ProgressCallback,
    ReconcileObserver,
};
pub use error::{Error, InfrastructureError, Result, Stage};
pub use planner::DependencyLevels;
pub use reconciler::ContainerStateReconciler;
pub use redirector::{ENTRY_REDIRECTOR, EXIT_REDIRECTOR};
pub use types::{
    ApplicationDefinition, BuildContext, BuildFile, ContainerOutcome, DesiredApplication,
    Endpoint, FileSource, OutputContext, PortRedirect, PostStartAction, ReconcileOptions,
    ReconcilePlan, ReconcileSummary, VolumeMount,
};
