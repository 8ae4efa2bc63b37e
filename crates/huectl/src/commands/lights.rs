//! Light command handlers.

use std::sync::Arc;

use tabled::Tabled;

use huectl_api::models::Light;
use huectl_core::{Bridge, ResourceType, Step};

use crate::cli::{GlobalOpts, LightsArgs, LightsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct LightRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "On")]
    on: String,
    #[tabled(rename = "Brightness")]
    brightness: String,
    #[tabled(rename = "Mirek")]
    mirek: String,
}

impl LightRow {
    fn new(l: &Arc<Light>, color: bool) -> Self {
        Self {
            id: l.id.clone(),
            name: l.metadata.name.clone(),
            on: output::on_off(l.on.on, color),
            brightness: format_brightness(l.brightness()),
            mirek: mirek(l).map(|m| m.to_string()).unwrap_or_default(),
        }
    }
}

fn format_brightness(brightness: Option<f64>) -> String {
    brightness.map(|b| format!("{b:.0}%")).unwrap_or_default()
}

fn mirek(l: &Light) -> Option<u16> {
    l.color_temperature.as_ref().and_then(|ct| ct.mirek)
}

fn detail(l: &Arc<Light>) -> String {
    let mut lines = vec![
        format!("ID:          {}", l.id),
        format!("Name:        {}", l.metadata.name),
        format!("On:          {}", output::on_off(l.on.on, false)),
    ];
    if let Some(b) = l.brightness() {
        lines.push(format!("Brightness:  {}", format_brightness(Some(b))));
    }
    if let Some(ct) = &l.color_temperature {
        let value = ct.mirek.map_or_else(|| "-".into(), |m| m.to_string());
        let range = ct
            .mirek_schema
            .map(|s| format!(" ({}-{})", s.mirek_minimum, s.mirek_maximum))
            .unwrap_or_default();
        lines.push(format!("Mirek:       {value}{range}"));
    }
    if let Some(c) = &l.color {
        lines.push(format!("Color xy:    {:.4}, {:.4}", c.xy.x, c.xy.y));
    }
    lines.join("\n")
}

fn lookup(bridge: &Bridge, query: &str) -> Result<Arc<Light>, CliError> {
    let (id, _) = util::resolve(bridge, ResourceType::Light, query)?;
    bridge.cache().light(&id).ok_or_else(|| CliError::NotFound {
        resource_type: "light".into(),
        identifier: query.into(),
        list_command: "lights list".into(),
    })
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(bridge: &Bridge, args: LightsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color_mode());

    match args.command {
        LightsCommand::List => {
            let mut lights: Vec<Arc<Light>> = bridge.cache().lights().iter().cloned().collect();
            lights.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
            let out = output::render_list(
                global.format(),
                &lights,
                |l| LightRow::new(l, color),
                |l| l.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        LightsCommand::Get { light } => {
            let light = lookup(bridge, &light)?;
            let out = output::render_single(global.format(), &light, detail, |l| l.id.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        LightsCommand::On { light } => switch(bridge, &light, true, color, global).await,
        LightsCommand::Off { light } => switch(bridge, &light, false, color, global).await,

        LightsCommand::Toggle { light } => {
            let (id, name) = util::resolve(bridge, ResourceType::Light, &light)?;
            let on = bridge.toggle_light(&id).await?;
            output::notice(&format!("{name} is {}", output::on_off(on, color)), global.quiet);
            Ok(())
        }

        LightsCommand::Brightness { light, value } => {
            let (id, name) = util::resolve(bridge, ResourceType::Light, &light)?;
            bridge.set_light_brightness(&id, value).await?;
            output::notice(
                &format!("{name} brightness {}", format_brightness(Some(value))),
                global.quiet,
            );
            Ok(())
        }

        LightsCommand::Brighter { light } => step_brightness(bridge, &light, Step::Up, global).await,
        LightsCommand::Dimmer { light } => step_brightness(bridge, &light, Step::Down, global).await,

        // Up is warmer: higher mirek.
        LightsCommand::Warmer { light } => step_temperature(bridge, &light, Step::Up, global).await,
        LightsCommand::Cooler { light } => {
            step_temperature(bridge, &light, Step::Down, global).await
        }

        LightsCommand::Color { light, x, y } => {
            let (id, name) = util::resolve(bridge, ResourceType::Light, &light)?;
            bridge.set_light_color(&id, x, y).await?;
            output::notice(&format!("{name} colour set to {x:.4}, {y:.4}"), global.quiet);
            Ok(())
        }
    }
}

async fn switch(
    bridge: &Bridge,
    query: &str,
    on: bool,
    color: bool,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (id, name) = util::resolve(bridge, ResourceType::Light, query)?;
    bridge.set_light_on(&id, on).await?;
    output::notice(&format!("{name} is {}", output::on_off(on, color)), global.quiet);
    Ok(())
}

async fn step_brightness(
    bridge: &Bridge,
    query: &str,
    step: Step,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (id, name) = util::resolve(bridge, ResourceType::Light, query)?;
    let brightness = bridge.step_light_brightness(&id, step).await?;
    output::notice(
        &format!("{name} brightness {}", format_brightness(Some(brightness))),
        global.quiet,
    );
    Ok(())
}

async fn step_temperature(
    bridge: &Bridge,
    query: &str,
    step: Step,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let (id, name) = util::resolve(bridge, ResourceType::Light, query)?;
    let mirek = bridge.step_light_temperature(&id, step).await?;
    output::notice(&format!("{name} colour temperature {mirek} mirek"), global.quiet);
    Ok(())
}
