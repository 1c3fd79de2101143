//! Change hooks installed on the engine by the binary

use graphstore::{ChangesHook, HookEvent};

/// Logs every committed item and batch outcome.
pub struct LogHook;

impl ChangesHook for LogHook {
    fn name(&self) -> &str {
        "log"
    }

    fn handle(&self, event: HookEvent<'_>) -> graphstore::Result<()> {
        match event {
            HookEvent::FillApplyChangesContext { changes, .. } => {
                log::debug!("Applying {} change(s)", changes.len());
            }
            HookEvent::ResourceAdded(resource) => log::debug!("+ {resource}"),
            HookEvent::ResourceUpdated { current, .. } => log::debug!("~ {current}"),
            HookEvent::ResourceDeleted(resource) => log::debug!("- {resource}"),
            HookEvent::LinkAdded(link) => {
                log::debug!("+ {} {} {}", link.from, link.link_type, link.to);
            }
            HookEvent::LinkDeleted(link) => {
                log::debug!("- {} {} {}", link.from, link.link_type, link.to);
            }
            HookEvent::TagAdded { resource, tag_name } => log::debug!("+ {resource} #{tag_name}"),
            HookEvent::TagDeleted { resource, tag_name } => log::debug!("- {resource} #{tag_name}"),
            HookEvent::Success(report) => {
                if !report.is_empty() {
                    log::info!("Committed {} change(s)", report.total());
                }
            }
            HookEvent::FailureInfinite { changes, error } => {
                log::error!(
                    "Batch of {} change(s) keeps failing ({}): {error}",
                    changes.len(),
                    changes.fingerprint()
                );
            }
        }
        Ok(())
    }
}
