use xprov_core::Provisioner;

use crate::cli::{GlobalOpts, InboundArgs, InboundCommand};
use crate::config;
use crate::error::CliError;

pub async fn handle(args: InboundArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let InboundCommand::Show { id } = args.command;

    let (_, engine_config) = config::resolve_engine_config(global)?;
    let provisioner = Provisioner::from_config(&engine_config)?;

    match provisioner.inspect(id).await? {
        Some(view) => {
            println!("{}", serde_json::to_string_pretty(&view)?);
            Ok(())
        }
        None => Err(CliError::Validation {
            field: "inbound".into(),
            reason: "the target inbound was not found on the backend".into(),
        }),
    }
}
