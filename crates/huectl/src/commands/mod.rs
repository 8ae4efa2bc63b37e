//! Command dispatch: bridges CLI args -> core operations -> output formatting.

pub mod groups;
pub mod lights;
pub mod pair;
pub mod scenes;
pub mod util;
pub mod watch;

use std::sync::Arc;

use huectl_core::{Bridge, BridgeConfig, BridgeStorage};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// Connect to the saved bridge.
pub async fn connect(
    config: BridgeConfig,
    storage: Arc<dyn BridgeStorage>,
) -> Result<Bridge, CliError> {
    Ok(Bridge::connect_stored(config, storage).await?)
}

/// Dispatch a bridge-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, bridge: &Bridge, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Lights(args) => lights::handle(bridge, args, global).await,
        Command::Rooms(_) => groups::list_rooms(bridge, global),
        Command::Zones(_) => groups::list_zones(bridge, global),
        Command::Groups(args) => groups::handle(bridge, args, global).await,
        Command::Scenes(args) => scenes::handle(bridge, args, global).await,
        Command::Watch(args) => watch::handle(bridge, args, global).await,
        Command::Off => {
            let switched = bridge.turn_off_all_lights().await?;
            output::notice(&format!("Turned off {switched} light(s)"), global.quiet);
            Ok(())
        }
        // Handled before a bridge connection is made
        Command::Pair(_) | Command::Unlink | Command::Status(_) | Command::Completions(_) => {
            Err(CliError::Internal("command does not need a bridge".into()))
        }
    }
}
