//! `infragraph reconcile`

use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use declarative::{DesiredApplication, ReconcilePlan, ReconcileSummary};
use graphstore::ChangesContext;

use crate::Context;
use crate::app::App;
use crate::cli::ReconcileArgs;
use crate::progress::{self, ReconcileProgress};
use crate::ui;

/// Tag put on applications whose container converged
pub const DEPLOYED_TAG: &str = "deployed";

pub fn run(ctx: &Context, app: &App, args: ReconcileArgs) -> Result<()> {
    let machine = args
        .machine
        .unwrap_or_else(|| app.config.reconcile.machine.clone());
    ui::header(&format!("Reconciling {machine}"));
    if app.simulate {
        ui::warn("Simulated container runtime - nothing real is started");
    }

    let desired = app
        .registry
        .desired_applications(&app.engine.reader(), &machine)
        .context("Could not derive application definitions")?;
    let reconciler = app.reconciler(args.jobs)?;

    ui::step(1, 3, "Observing containers");
    let pb = progress::spinner("Listing containers...");
    let observed = match reconciler.observe() {
        Ok(observed) => {
            progress::finish_success(&pb, &format!("{} container(s) observed", observed.len()));
            observed
        }
        Err(e) => {
            progress::finish_error(&pb, "Could not list containers");
            return Err(e.into());
        }
    };

    let plan = reconciler.plan(&observed, desired.clone())?;
    print_plan(&plan);

    if args.dry_run {
        println!();
        ui::warn("Dry run - no changes will be made");
        return Ok(());
    }

    if !plan.prune.is_empty() && !args.yes && !confirm_prune(&plan.prune)? {
        ui::info("Cancelled");
        return Ok(());
    }

    ui::step(2, 3, "Converging");
    let total = plan.levels.iter().map(Vec::len).sum();
    let mut bar = ReconcileProgress::new(total, ctx.quiet);
    let result = reconciler.reconcile(&observed, desired.clone(), &mut bar);
    bar.finish();
    let summary = result?;

    ui::step(3, 3, "Recording deployments");
    let tagged = record_deployments(app, &desired, &summary)?;
    if ctx.verbose > 0 {
        ui::dim(&format!("{tagged} application(s) newly tagged {DEPLOYED_TAG}"));
    }

    print_summary(&summary);
    if !summary.is_success() {
        anyhow::bail!("{} container(s) failed to converge", summary.failures.len());
    }
    Ok(())
}

fn print_plan(plan: &ReconcilePlan) {
    ui::section("Plan");
    if !plan.prune.is_empty() {
        ui::kv("Prune", &ui::names(&plan.prune).red().to_string());
    }
    for (number, level) in plan.levels.iter().enumerate() {
        ui::kv(&format!("Level {}", number + 1), &ui::names(level));
    }
    if plan.levels.is_empty() {
        ui::dim("No applications defined for this machine");
    }
}

fn confirm_prune(names: &[String]) -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt(format!("Remove {} container(s) nothing declares?", names.len()))
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Tag the source resource of every converged application.
///
/// Returns how many tags were added.
pub fn record_deployments(app: &App, desired: &[DesiredApplication], summary: &ReconcileSummary) -> Result<usize> {
    let reader = app.engine.reader();
    let mut changes = ChangesContext::new();

    for (ctx, definition) in desired {
        let converged = summary.started.contains(&definition.name) || summary.unchanged.contains(&definition.name);
        let Some(id) = ctx.source_resource else { continue };
        if !converged || reader.tags_of(id)?.contains(DEPLOYED_TAG) {
            continue;
        }
        if let Some(resource) = reader.find_by_id(id)? {
            changes.tag_add(&resource, DEPLOYED_TAG);
        }
    }

    let count = changes.len();
    if count > 0 {
        app.engine
            .apply(&mut changes)
            .context("Could not record deployments")?;
    }
    Ok(count)
}

fn print_summary(summary: &ReconcileSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Containers converged", "✓".green().bold());
    } else {
        println!("  {} Converged with errors", "⚠".yellow().bold());
    }

    if !summary.pruned.is_empty() {
        println!("    • {} pruned", summary.pruned.len());
    }
    if !summary.built.is_empty() {
        println!("    • {} built", summary.built.len());
    }
    if !summary.started.is_empty() {
        println!("    • {} started", summary.started.len());
    }
    if !summary.unchanged.is_empty() {
        println!("    • {} unchanged", summary.unchanged.len());
    }
    for (name, reason) in &summary.skipped {
        println!("    • {} skipped: {reason}", name.yellow());
    }
    for failure in &summary.failures {
        println!("    • {}", failure.to_string().red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InfragraphConfig, StoreBackendKind};
    use crate::plugin::types::{Application, Machine};
    use declarative::NoProgress;
    use graphstore::{LinkType, TypedResource};

    #[test]
    fn test_converged_applications_are_tagged_once() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = InfragraphConfig::default();
        config.store.backend = StoreBackendKind::Memory;
        config.reconcile.volumes_root = tmp.path().display().to_string();
        let app = App::open(config, true).unwrap();

        let host = Machine {
            name: "localhost".to_string(),
            address: None,
        }
        .to_resource();
        let web = Application::new("web", "FROM nginx").to_resource();
        let mut changes = ChangesContext::new();
        changes
            .resource_add(host.clone())
            .resource_add(web.clone())
            .link_add(&web, LinkType::InstalledOn, &host);
        app.engine.apply(&mut changes).unwrap();

        let desired = app
            .registry
            .desired_applications(&app.engine.reader(), "localhost")
            .unwrap();
        let reconciler = app.reconciler(Some(1)).unwrap();
        let observed = reconciler.observe().unwrap();
        let summary = reconciler.reconcile(&observed, desired.clone(), &mut NoProgress).unwrap();
        assert_eq!(summary.started, vec!["web".to_string()]);

        assert_eq!(record_deployments(&app, &desired, &summary).unwrap(), 1);
        assert_eq!(record_deployments(&app, &desired, &summary).unwrap(), 0);

        let tagged = app
            .engine
            .reader()
            .find(&graphstore::Query::of_type(Application::TYPE).tag(DEPLOYED_TAG))
            .unwrap();
        assert_eq!(tagged.len(), 1);
    }
}
