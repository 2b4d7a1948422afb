//! Device command handlers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use comfortlink_core::{Device, DeviceId, Engine, InventoryCache};
use serde::Serialize;
use serde_json::{Map, Value};
use tabled::Tabled;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

// ── Views ───────────────────────────────────────────────────────────

/// Serializable projection of a device for JSON output.
#[derive(Serialize)]
pub struct DeviceView {
    pub id: DeviceId,
    pub name: String,
    pub location: Option<String>,
    pub alive: bool,
    pub communication_lost: bool,
    pub mode: Option<String>,
    pub fan: Option<String>,
    pub units: Option<String>,
    pub indoor_temperature: Option<f64>,
    pub outdoor_temperature: Option<f64>,
    pub indoor_humidity: Option<f64>,
    pub heat_setpoint: Option<f64>,
    pub cool_setpoint: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl DeviceView {
    pub fn new(cache: &InventoryCache, device: &Arc<Device>) -> Self {
        Self {
            id: device.id(),
            name: device.name(),
            location: cache
                .location_of(device.id())
                .map(|l| l.name().to_owned()),
            alive: device.is_alive(),
            communication_lost: device.communication_lost(),
            mode: device.system_mode().map(|m| m.to_string()),
            fan: device.fan_mode().map(|m| m.to_string()),
            units: device.display_units().map(|u| u.to_string()),
            indoor_temperature: device.indoor_temperature(),
            outdoor_temperature: device.outdoor_temperature(),
            indoor_humidity: device.indoor_humidity(),
            heat_setpoint: device.heat_setpoint(),
            cool_setpoint: device.cool_setpoint(),
            updated_at: device.last_updated(),
        }
    }

    /// One-line summary used by `watch`.
    pub fn summary_line(&self) -> String {
        format!(
            "{} {} [{}] indoor={} heat={} cool={} mode={} fan={}",
            self.id,
            self.name,
            state_label(self),
            output::number(self.indoor_temperature),
            output::number(self.heat_setpoint),
            output::number(self.cool_setpoint),
            self.mode.as_deref().unwrap_or("-"),
            self.fan.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Location")]
    location: String,
    #[tabled(rename = "Mode")]
    mode: String,
    #[tabled(rename = "Indoor")]
    indoor: String,
    #[tabled(rename = "Heat")]
    heat: String,
    #[tabled(rename = "Cool")]
    cool: String,
    #[tabled(rename = "Fan")]
    fan: String,
    #[tabled(rename = "State")]
    state: String,
}

impl From<&DeviceView> for DeviceRow {
    fn from(d: &DeviceView) -> Self {
        let units = d.units.as_deref().unwrap_or("");
        let with_units = |v: Option<f64>| match v {
            Some(_) => format!("{}{units}", output::number(v)),
            None => "-".into(),
        };
        Self {
            id: d.id.to_string(),
            name: d.name.clone(),
            location: d.location.clone().unwrap_or_default(),
            mode: d.mode.clone().unwrap_or_else(|| "-".into()),
            indoor: with_units(d.indoor_temperature),
            heat: with_units(d.heat_setpoint),
            cool: with_units(d.cool_setpoint),
            fan: d.fan.clone().unwrap_or_else(|| "-".into()),
            state: state_label(d).into(),
        }
    }
}

fn state_label(d: &DeviceView) -> &'static str {
    if d.communication_lost {
        "lost"
    } else if d.alive {
        "alive"
    } else {
        "offline"
    }
}

/// Full device detail, raw snapshot included.
#[derive(Serialize)]
struct DeviceDetailView {
    #[serde(flatten)]
    summary: DeviceView,
    mac_id: Option<String>,
    snapshot: Map<String, Value>,
}

fn detail(d: &DeviceDetailView) -> String {
    let s = &d.summary;
    let mut lines = vec![
        format!("ID:       {}", s.id),
        format!("Name:     {}", s.name),
        format!("Location: {}", s.location.as_deref().unwrap_or("-")),
        format!("MAC:      {}", d.mac_id.as_deref().unwrap_or("-")),
        format!("State:    {}", state_label(s)),
        format!("Mode:     {}", s.mode.as_deref().unwrap_or("-")),
        format!("Fan:      {}", s.fan.as_deref().unwrap_or("-")),
        format!("Indoor:   {}", output::number(s.indoor_temperature)),
        format!("Outdoor:  {}", output::number(s.outdoor_temperature)),
        format!("Humidity: {}", output::number(s.indoor_humidity)),
        format!("Heat:     {}", output::number(s.heat_setpoint)),
        format!("Cool:     {}", output::number(s.cool_setpoint)),
        format!(
            "Updated:  {}",
            s.updated_at
                .map_or_else(|| "-".into(), |t| t.to_rfc3339())
        ),
    ];
    if !d.snapshot.is_empty() {
        lines.push(String::new());
        lines.extend(d.snapshot.iter().map(|(k, v)| format!("{k:<32} {v}")));
    }
    lines.join("\n")
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    super::poll(engine).await?;

    let views: Vec<DeviceView> = engine
        .devices()
        .iter()
        .map(|d| DeviceView::new(engine.cache(), d))
        .collect();
    let rendered = output::render_list(
        global.output,
        &views,
        |d| DeviceRow::from(d),
        |d| d.id.to_string(),
    )?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}

pub async fn show(engine: &Engine, device_id: DeviceId, global: &GlobalOpts) -> Result<(), CliError> {
    super::poll(engine).await?;

    let device = engine.device(device_id).ok_or_else(|| CliError::NotFound {
        identifier: device_id.to_string(),
    })?;
    let view = DeviceDetailView {
        summary: DeviceView::new(engine.cache(), &device),
        mac_id: device.mac_id(),
        snapshot: device.snapshot(),
    };
    let rendered = output::render_single(global.output, &view, detail, |d| {
        d.summary.id.to_string()
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
