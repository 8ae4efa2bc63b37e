//! Scene command handlers.

use std::sync::Arc;

use tabled::Tabled;

use huectl_api::models::Scene;
use huectl_core::{Bridge, ResourceType};

use crate::cli::{GlobalOpts, ScenesArgs, ScenesCommand};
use crate::error::CliError;
use crate::output;

use super::util;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SceneRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Active")]
    active: String,
}

impl SceneRow {
    fn new(s: &Arc<Scene>, bridge: &Bridge) -> Self {
        Self {
            id: s.id.clone(),
            name: s.metadata.name.clone(),
            group: group_name(s, bridge),
            active: if s.is_active() { "yes".into() } else { String::new() },
        }
    }
}

/// Name of the room or zone a scene belongs to, or its id if unknown.
fn group_name(scene: &Scene, bridge: &Bridge) -> String {
    let cache = bridge.cache();
    let rid = &scene.group.rid;
    let group = match scene.group.rtype.as_str() {
        "room" => cache.room(rid),
        "zone" => cache.zone(rid),
        _ => None,
    };
    group.map_or_else(|| rid.clone(), |g| g.metadata.name.clone())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(bridge: &Bridge, args: ScenesArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ScenesCommand::List => {
            let mut scenes: Vec<Arc<Scene>> = bridge.cache().scenes().iter().cloned().collect();
            scenes.sort_by(|a, b| {
                group_name(a, bridge)
                    .cmp(&group_name(b, bridge))
                    .then_with(|| a.metadata.name.cmp(&b.metadata.name))
            });
            let out = output::render_list(
                global.format(),
                &scenes,
                |s| SceneRow::new(s, bridge),
                |s| s.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ScenesCommand::Recall { scene } => {
            let (id, name) = util::resolve(bridge, ResourceType::Scene, &scene)?;
            bridge.recall_scene(&id).await?;
            output::notice(&format!("Recalled {name}"), global.quiet);
            Ok(())
        }
    }
}
