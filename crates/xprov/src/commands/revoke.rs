use xprov_core::Provisioner;

use crate::cli::{GlobalOpts, RevokeArgs};
use crate::config;
use crate::error::CliError;

pub async fn handle(args: RevokeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (profile_name, engine_config) = config::resolve_engine_config(global)?;
    let provisioner = Provisioner::from_config(&engine_config)?;

    let receipt = provisioner.remove(args.uuid).await?;

    if receipt.was_present {
        println!(
            "client {} removed from '{profile_name}' ({} at stage {})",
            receipt.client_id, receipt.outcome, receipt.stage
        );
    } else {
        println!("client {} was not present -- nothing to do", receipt.client_id);
    }
    Ok(())
}
