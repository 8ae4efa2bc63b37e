//! Shared helpers for command handlers.

use std::io::IsTerminal;

use huectl_core::{Bridge, Resource, ResourceType};

use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
pub fn confirm(message: &str, yes_flag: bool) -> Result<bool, CliError> {
    if yes_flag {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: message.into(),
        });
    }
    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))
}

/// Resolve a light by id or name, returning `(id, display name)`.
pub fn resolve(
    bridge: &Bridge,
    rtype: ResourceType,
    query: &str,
) -> Result<(String, String), CliError> {
    let resource = bridge.find(rtype, query)?;
    Ok((resource.id().to_owned(), display_name(&resource)))
}

pub fn display_name(resource: &Resource) -> String {
    resource
        .name()
        .map_or_else(|| resource.id().to_owned(), str::to_owned)
}
