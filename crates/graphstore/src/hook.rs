//! Change hooks
//!
//! Hooks observe every batch the engine applies. They are registered as an
//! ordered list and all receive the same [`HookEvent`]s, in commit order.

use crate::changes::ChangesContext;
use crate::engine::CommitReport;
use crate::error::{Error, Result};
use crate::reader::GraphReader;
use crate::resource::{Link, Resource};

/// What happened, as seen by a hook.
#[derive(Debug)]
pub enum HookEvent<'a> {
    /// Before validation; hooks may append derived changes
    FillApplyChangesContext {
        reader: &'a GraphReader,
        changes: &'a mut ChangesContext,
    },
    ResourceAdded(&'a Resource),
    ResourceUpdated {
        previous: &'a Resource,
        current: &'a Resource,
    },
    LinkAdded(&'a Link),
    TagAdded {
        resource: &'a Resource,
        tag_name: &'a str,
    },
    LinkDeleted(&'a Link),
    TagDeleted {
        resource: &'a Resource,
        tag_name: &'a str,
    },
    ResourceDeleted(&'a Resource),
    /// After the batch is durably committed
    Success(&'a CommitReport),
    /// The same batch failed too many times in a row
    FailureInfinite {
        changes: &'a ChangesContext,
        error: &'a Error,
    },
}

impl HookEvent<'_> {
    /// Stable name used in logs and hook errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::FillApplyChangesContext { .. } => "fillApplyChangesContext",
            Self::ResourceAdded(_) => "resourceAdded",
            Self::ResourceUpdated { .. } => "resourceUpdated",
            Self::LinkAdded(_) => "linkAdded",
            Self::TagAdded { .. } => "tagAdded",
            Self::LinkDeleted(_) => "linkDeleted",
            Self::TagDeleted { .. } => "tagDeleted",
            Self::ResourceDeleted(_) => "resourceDeleted",
            Self::Success(_) => "success",
            Self::FailureInfinite { .. } => "failureInfinite",
        }
    }
}

/// Observer of applied changes.
pub trait ChangesHook: Send + Sync {
    fn name(&self) -> &str;

    /// Handle one event. An error during `FillApplyChangesContext` or a commit
    /// event aborts the batch; errors from `Success` and `FailureInfinite` are
    /// logged only.
    fn handle(&self, event: HookEvent<'_>) -> Result<()>;
}

/// Hook ignoring every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHook;

impl ChangesHook for NoopHook {
    fn name(&self) -> &str {
        "noop"
    }

    fn handle(&self, _event: HookEvent<'_>) -> Result<()> {
        Ok(())
    }
}
