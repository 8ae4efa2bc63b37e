//! Pairing, unlinking and status.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use huectl_config::FileStorage;
use huectl_core::storage::{StoredPairing, erase_pairing, load_pairing};
use huectl_core::{
    Bridge, BridgeBackend, BridgeConfig, BridgeStorage, PairingHandle, PairingSnapshot,
    PairingState, ResourceType,
};

use crate::cli::{GlobalOpts, PairArgs, StatusArgs};
use crate::error::CliError;
use crate::output;

use super::util;

/// Pause before retrying unattended, giving the user time to press the
/// link button.
const RETRY_DELAY: Duration = Duration::from_secs(3);

// ── Pair ────────────────────────────────────────────────────────────

pub async fn pair(
    args: PairArgs,
    config: BridgeConfig,
    storage: Arc<FileStorage>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let storage: Arc<dyn BridgeStorage> = storage;
    let backend = BridgeBackend::new(config, Arc::clone(&storage));
    let handle = PairingHandle::start(backend, storage, CancellationToken::new());

    let result = drive(&handle, args.attempts, global).await;

    if let Ok(bridge) = handle.session() {
        bridge.disconnect().await;
    }
    handle.shutdown();
    result
}

async fn drive(
    handle: &PairingHandle<Bridge>,
    attempts: u32,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let color = output::should_color(global.color_mode());
    let spinner = spinner(global.quiet);
    let mut failures = 0;

    loop {
        let snap = settled(handle, &spinner).await?;
        spinner.suspend(|| show_guidance(&snap, color, global.quiet));

        match snap.state {
            PairingState::Connected => {
                spinner.finish_and_clear();
                if let Some(bridge) = &snap.session {
                    output::notice(
                        &format!(
                            "Paired with {} at {} ({} lights)",
                            bridge.identity().id,
                            bridge.identity().ip_address,
                            bridge.cache().len(ResourceType::Light)
                        ),
                        global.quiet,
                    );
                }
                return Ok(());
            }
            PairingState::LinkWithBridge => {
                let go = spinner.suspend(|| {
                    util::confirm("Have you pressed the link button?", global.yes)
                })?;
                if !go {
                    return Err(give_up(&snap));
                }
                handle.link().await?;
            }
            _ => {
                failures += 1;
                if failures > attempts {
                    return Err(give_up(&snap));
                }
                if global.yes {
                    tokio::time::sleep(RETRY_DELAY).await;
                } else if !spinner.suspend(|| util::confirm("Retry?", false))? {
                    return Err(give_up(&snap));
                }
                handle.retry().await?;
            }
        }
    }
}

/// Wait for a state that needs the user, showing progress meanwhile.
async fn settled(
    handle: &PairingHandle<Bridge>,
    spinner: &ProgressBar,
) -> Result<PairingSnapshot<Bridge>, CliError> {
    let mut rx = handle.subscribe();
    loop {
        let snap = rx.borrow_and_update().clone();
        if snap.state.awaits_user() {
            return Ok(snap);
        }
        spinner.set_message(snap.guidance.body);
        rx.changed().await.map_err(|_| CliError::SessionClosed)?;
    }
}

fn spinner(quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

fn show_guidance(snap: &PairingSnapshot<Bridge>, color: bool, quiet: bool) {
    if quiet {
        return;
    }
    eprintln!("{}", output::heading(snap.guidance.title, color));
    eprintln!("{}", snap.guidance.body);
    if let Some(reason) = &snap.last_error {
        eprintln!("({reason})");
    }
}

fn give_up(snap: &PairingSnapshot<Bridge>) -> CliError {
    CliError::PairingFailed {
        title: snap.guidance.title.to_owned(),
        body: snap.guidance.body.to_owned(),
    }
}

// ── Unlink ──────────────────────────────────────────────────────────

pub fn unlink(storage: &FileStorage, global: &GlobalOpts) -> Result<(), CliError> {
    if !util::confirm("Forget the saved Hue Bridge and its application key?", global.yes)? {
        return Ok(());
    }
    erase_pairing(storage)?;
    output::notice("Unlinked. Run `huectl pair` to pair again.", global.quiet);
    Ok(())
}

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
struct StatusView {
    paired: bool,
    bridge_id: Option<String>,
    ip_address: Option<String>,
    key_source: Option<&'static str>,
    reachable: Option<bool>,
    error: Option<String>,
    lights: Option<usize>,
    rooms: Option<usize>,
    zones: Option<usize>,
    scenes: Option<usize>,
}

pub async fn status(
    args: StatusArgs,
    config: BridgeConfig,
    storage: Arc<FileStorage>,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let mut view = StatusView::default();
    let stored = load_pairing(storage.as_ref())?;

    match &stored {
        StoredPairing::Nothing => {}
        StoredPairing::BridgeOnly(bridge) | StoredPairing::Complete(bridge, _) => {
            view.bridge_id = Some(bridge.id.clone());
            view.ip_address = Some(bridge.ip_address.to_string());
        }
    }
    if matches!(stored, StoredPairing::Complete(..)) {
        view.paired = true;
        view.key_source = Some(if storage.key_from_env() {
            "environment"
        } else {
            "stored"
        });
    }

    if view.paired && !args.offline {
        match super::connect(config, storage).await {
            Ok(bridge) => {
                let cache = bridge.cache();
                view.reachable = Some(true);
                view.lights = Some(cache.len(ResourceType::Light));
                view.rooms = Some(cache.len(ResourceType::Room));
                view.zones = Some(cache.len(ResourceType::Zone));
                view.scenes = Some(cache.len(ResourceType::Scene));
                bridge.disconnect().await;
            }
            Err(e) => {
                view.reachable = Some(false);
                view.error = Some(e.to_string());
            }
        }
    }

    let out = output::render_single(global.format(), &view, detail, |v| {
        v.bridge_id.clone().unwrap_or_default()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

fn detail(v: &StatusView) -> String {
    if v.bridge_id.is_none() {
        return "Not paired. Run `huectl pair`.".into();
    }
    let count = |n: Option<usize>| n.map_or_else(|| "-".into(), |n| n.to_string());
    let mut lines = vec![
        format!("Bridge:     {}", v.bridge_id.as_deref().unwrap_or("-")),
        format!("Address:    {}", v.ip_address.as_deref().unwrap_or("-")),
        format!(
            "Paired:     {}",
            if v.paired { "yes" } else { "no (link pending)" }
        ),
    ];
    if let Some(source) = v.key_source {
        lines.push(format!("Key:        {source}"));
    }
    if let Some(reachable) = v.reachable {
        lines.push(format!(
            "Reachable:  {}",
            if reachable { "yes" } else { "no" }
        ));
    }
    if let Some(error) = &v.error {
        lines.push(format!("Error:      {error}"));
    }
    if v.reachable == Some(true) {
        lines.push(format!("Lights:     {}", count(v.lights)));
        lines.push(format!("Rooms:      {}", count(v.rooms)));
        lines.push(format!("Zones:      {}", count(v.zones)));
        lines.push(format!("Scenes:     {}", count(v.scenes)));
    }
    lines.join("\n")
}
