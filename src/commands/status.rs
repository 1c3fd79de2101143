use anyhow::Result;
use colored::Colorize;
use graphstore::Query;

use crate::Context;
use crate::app::App;
use crate::timers::cert_renewal::OpensslAuthority;
use crate::ui;

pub fn run(ctx: &Context, app: &App) -> Result<()> {
    ui::header("infragraph Status");

    show_store_status(app)?;
    show_plugins_status(app);
    show_containers_status(ctx, app);

    println!();
    Ok(())
}

fn show_store_status(app: &App) -> Result<()> {
    ui::section("Graph");
    let reader = app.engine.reader();
    ui::kv("Backend", reader.backend_name());
    if reader.backend_name() == "sqlite" {
        ui::kv("Path", &app.config.store.expanded_path().display().to_string());
    }

    for spec in app.registry.resource_types() {
        let count = reader.count(&Query::of_type(spec.name))?;
        let count = if count > 0 {
            count.to_string().bold()
        } else {
            count.to_string().dimmed()
        };
        ui::kv(spec.name, &count.to_string());
    }
    Ok(())
}

fn show_plugins_status(app: &App) {
    ui::section("Plugins");
    ui::kv("Loaded", &app.registry.plugin_names().join(", "));
    for timer in app.registry.timers() {
        ui::kv(
            &format!("Timer {}", timer.name),
            &format!("every {}s", timer.interval.as_secs()),
        );
    }
    let openssl = if OpensslAuthority::default().is_available() {
        "found".green()
    } else {
        "missing, certificates cannot be renewed".yellow()
    };
    ui::kv("openssl", &openssl.to_string());
}

fn show_containers_status(ctx: &Context, app: &App) {
    ui::section("Containers");
    let control = match app.control_plane() {
        Ok(control) => control,
        Err(e) => {
            ui::warn(&format!("{e:#}"));
            return;
        }
    };
    if !control.is_available() {
        ui::warn(&format!("{} is not answering", control.name()));
        return;
    }

    match control.list() {
        Ok(observed) => {
            ui::kv("Runtime", control.name());
            ui::kv("Containers", &observed.len().to_string());
            if ctx.verbose > 0 {
                for container in observed.iter() {
                    ui::dim(&format!("{} {} ({})", container.name, container.image, container.status));
                }
            }
        }
        Err(e) => ui::error(&format!("Could not list containers: {e}")),
    }
}
