//! `check`: one full poll cycle and a connection summary.

use comfortlink_core::Engine;
use serde::Serialize;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct CheckReport {
    user: String,
    status: String,
    locations: usize,
    devices: usize,
    refreshed: usize,
    failed: Vec<String>,
}

pub async fn handle(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let polled = super::poll(engine).await;

    let last = engine.last_result();
    let report = CheckReport {
        user: engine.session().username().to_owned(),
        status: engine.status().to_string(),
        locations: engine.locations().len(),
        devices: engine.devices().len(),
        refreshed: last.as_ref().map_or(0, |r| r.succeeded.len()),
        failed: last
            .iter()
            .flat_map(|r| r.failed.iter())
            .map(|(id, err)| format!("{id}: {err}"))
            .collect(),
    };
    polled?;

    let color = output::should_color(global.color);
    let status = output::paint_status(&engine.status(), color);
    let rendered = output::render_single(
        global.output,
        &report,
        |r| {
            let mut lines = vec![
                format!("User:      {}", r.user),
                format!("Status:    {status}"),
                format!("Locations: {}", r.locations),
                format!("Devices:   {} ({} refreshed)", r.devices, r.refreshed),
            ];
            lines.extend(r.failed.iter().map(|f| format!("Failed:    {f}")));
            lines.join("\n")
        },
        |r| r.status.clone(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
