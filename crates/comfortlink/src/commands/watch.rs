//! `watch`: run the engine and print device updates and status changes.

use std::sync::Arc;

use comfortlink_core::{ConsumerError, Device, Engine, InventoryCache};
use tracing::info;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::devices::DeviceView;

fn render_update(
    format: OutputFormat,
    cache: &InventoryCache,
    device: &Arc<Device>,
) -> Result<String, ConsumerError> {
    let view = DeviceView::new(cache, device);
    Ok(match format {
        OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(&view)?,
        OutputFormat::Table | OutputFormat::Plain => {
            let stamp = view
                .updated_at
                .map_or_else(|| "-".into(), |t| t.format("%H:%M:%S").to_string());
            format!("{stamp} {}", view.summary_line())
        }
    })
}

/// Register a printing consumer for every device currently in the cache.
/// Registration replaces, so calling this after each refresh is safe.
fn register_consumers(engine: &Engine, format: OutputFormat, quiet: bool) -> usize {
    let devices = engine.devices();
    for device in &devices {
        let cache = Arc::clone(engine.cache());
        engine.register_consumer(device.id(), move |device| {
            let line = render_update(format, &cache, device)?;
            output::print_output(&line, quiet);
            Ok(())
        });
    }
    devices.len()
}

pub async fn handle(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color);
    let mut status_rx = engine.subscribe_status();
    let mut refresh_rx = engine.cache().subscribe_refresh();

    // First cycle inline so a bad login fails fast with a proper exit code.
    super::poll(engine).await?;
    let count = register_consumers(engine, global.output, global.quiet);
    info!(devices = count, "watching");
    for device in engine.devices() {
        output::print_output(
            &render_update(global.output, engine.cache(), &device).map_err(|e| {
                CliError::Validation {
                    field: "output".into(),
                    reason: e.to_string(),
                }
            })?,
            global.quiet,
        );
    }
    status_rx.mark_unchanged();
    refresh_rx.mark_unchanged();

    engine.start().await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = status_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = status_rx.borrow().clone();
                eprintln!("status: {}", output::paint_status(&status, color));
            }
            changed = refresh_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                register_consumers(engine, global.output, global.quiet);
            }
        }
    }
    Ok(())
}
