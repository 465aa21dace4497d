//! Command dispatch: bridges CLI args -> gateway facade -> output.

pub mod order;
pub mod simulator;
pub mod watch;

use simbridge_core::Gateway;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a gateway-bound command to the appropriate handler.
pub async fn dispatch(cmd: Command, gateway: &Gateway, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(gateway, args, global).await,
        Command::Order(args) => order::handle(gateway, args, global).await,
        Command::Sim(args) => simulator::handle(gateway, args, global).await,
        // Completions is handled before dispatch
        Command::Completions(_) => unreachable!(),
    }
}
