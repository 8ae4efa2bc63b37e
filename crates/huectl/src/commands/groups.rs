//! Room, zone and group command handlers.

use std::sync::Arc;

use tabled::Tabled;

use huectl_api::models::Group;
use huectl_core::{Bridge, ResourceType};

use crate::cli::{GlobalOpts, GroupsArgs, GroupsCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Lights")]
    lights: usize,
    #[tabled(rename = "State")]
    state: String,
}

impl GroupRow {
    fn new(g: &Arc<Group>, bridge: &Bridge, color: bool) -> Self {
        let state = g
            .grouped_light_id()
            .and_then(|id| bridge.cache().grouped_light(id))
            .and_then(|gl| gl.on)
            .map(|on| output::on_off(on.on, color))
            .unwrap_or_default();
        Self {
            id: g.id.clone(),
            name: g.metadata.name.clone(),
            lights: light_count(g),
            state,
        }
    }
}

/// Rooms list devices as children, zones list lights directly.
fn light_count(g: &Group) -> usize {
    g.children
        .iter()
        .filter(|c| c.rtype == "light" || c.rtype == "device")
        .count()
}

fn render(bridge: &Bridge, groups: &[Arc<Group>], global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color_mode());
    let mut groups = groups.to_vec();
    groups.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
    let out = output::render_list(
        global.format(),
        &groups,
        |g| GroupRow::new(g, bridge, color),
        |g| g.id.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

// ── Handlers ────────────────────────────────────────────────────────

pub fn list_rooms(bridge: &Bridge, global: &GlobalOpts) -> Result<(), CliError> {
    render(bridge, &bridge.cache().rooms(), global)
}

pub fn list_zones(bridge: &Bridge, global: &GlobalOpts) -> Result<(), CliError> {
    render(bridge, &bridge.cache().zones(), global)
}

pub async fn handle(bridge: &Bridge, args: GroupsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(global.color_mode());

    match args.command {
        GroupsCommand::On { group } => {
            let (id, name) = grouped_light(bridge, &group)?;
            bridge.set_group_on(&id, true).await?;
            output::notice(&format!("{name} is {}", output::on_off(true, color)), global.quiet);
            Ok(())
        }
        GroupsCommand::Off { group } => {
            let (id, name) = grouped_light(bridge, &group)?;
            bridge.set_group_on(&id, false).await?;
            output::notice(&format!("{name} is {}", output::on_off(false, color)), global.quiet);
            Ok(())
        }
        GroupsCommand::Brightness { group, value } => {
            let (id, name) = grouped_light(bridge, &group)?;
            bridge.set_group_brightness(&id, value).await?;
            output::notice(&format!("{name} brightness {value:.0}%"), global.quiet);
            Ok(())
        }
    }
}

/// Resolve a room, or failing that a zone, to its grouped-light id and
/// display name.
fn grouped_light(bridge: &Bridge, query: &str) -> Result<(String, String), CliError> {
    let rtype = if bridge.find(ResourceType::Room, query).is_ok() {
        ResourceType::Room
    } else {
        ResourceType::Zone
    };
    let (_, name) = util::resolve(bridge, rtype, query).map_err(|_| CliError::NotFound {
        resource_type: "room or zone".into(),
        identifier: query.into(),
        list_command: "rooms list".into(),
    })?;
    let id = bridge.grouped_light_of(rtype, query)?;
    Ok((id, name))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use huectl_api::models::{Metadata, ResourceIdentifier};

    fn child(rtype: &str) -> ResourceIdentifier {
        ResourceIdentifier {
            rid: format!("{rtype}-1"),
            rtype: rtype.into(),
        }
    }

    #[test]
    fn counts_devices_and_lights_but_not_other_children() {
        let group = Group {
            id: "r1".into(),
            metadata: Metadata {
                name: "Living".into(),
                archetype: None,
            },
            children: vec![child("device"), child("light"), child("bridge_home")],
            services: vec![],
            extra: serde_json::Map::new(),
        };
        assert_eq!(light_count(&group), 2);
    }
}
