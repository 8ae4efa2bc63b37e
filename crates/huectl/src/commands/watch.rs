//! `huectl watch`: print bridge events as they arrive.

use futures_util::StreamExt;
use serde_json::Value;

use huectl_api::{EventKind, ResourcePartial, UpdateEvent};
use huectl_core::{Bridge, ResourceType};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(bridge: &Bridge, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let format = global.format();
    let mut events = std::pin::pin!(bridge.session().events());
    let mut seen = 0usize;

    output::notice("Watching for events (Ctrl-C to stop)", global.quiet);

    loop {
        if args.count.is_some_and(|limit| seen >= limit) {
            return Ok(());
        }

        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            next = events.next() => next,
        };

        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => return Err(CliError::from(huectl_core::CoreError::from(e))),
            None => {
                return Err(CliError::ConnectionFailed {
                    bridge: bridge.identity().ip_address.to_string(),
                    reason: "event stream ended".into(),
                });
            }
        };
        seen += 1;

        // Keep names current for later lines.
        for partial in &event.data {
            if let Some(rtype) = partial.resource_type() {
                bridge.cache().apply_partial(rtype, std::slice::from_ref(partial));
            }
        }

        let line = match format {
            OutputFormat::Json | OutputFormat::JsonCompact => output::render_json(&event, true)?,
            _ => describe(bridge, &event),
        };
        output::print_output(&line, global.quiet);
    }
}

fn kind_label(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Update => "update",
        EventKind::Add => "add",
        EventKind::Delete => "delete",
        EventKind::Error => "error",
        EventKind::Unknown => "unknown",
    }
}

/// One line per changed resource: time, kind, resource and what changed.
fn describe(bridge: &Bridge, event: &UpdateEvent) -> String {
    let time = event.creationtime.as_deref().unwrap_or("-");
    let kind = kind_label(event.kind);
    if event.data.is_empty() {
        return format!("{time} {kind}");
    }
    event
        .data
        .iter()
        .map(|partial| format!("{time} {kind} {}", describe_partial(bridge, partial)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn describe_partial(bridge: &Bridge, partial: &ResourcePartial) -> String {
    let rtype = partial
        .fields()
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("?");
    let id = partial.id().unwrap_or("?");
    let name = partial
        .resource_type()
        .filter(|t| *t != ResourceType::GroupedLight)
        .and_then(|t| bridge.cache().get(t, id))
        .and_then(|r| r.name().map(str::to_owned))
        .unwrap_or_else(|| id.to_owned());

    let changes: Vec<String> = partial
        .fields()
        .iter()
        .filter(|(key, _)| !matches!(key.as_str(), "id" | "id_v1" | "type" | "owner"))
        .map(|(key, value)| format!("{key}={}", summarize(value)))
        .collect();

    if changes.is_empty() {
        format!("{rtype} {name}")
    } else {
        format!("{rtype} {name} {}", changes.join(" "))
    }
}

/// Collapse single-field objects such as `{"on":true}` to their value.
fn summarize(value: &Value) -> String {
    match value {
        Value::Object(map) if map.len() == 1 => map.values().next().map_or_else(String::new, summarize),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
