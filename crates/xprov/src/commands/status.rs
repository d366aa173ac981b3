use xprov_core::Provisioner;

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (profile_name, engine_config) = config::resolve_engine_config(global)?;
    let provisioner = Provisioner::from_config(&engine_config)?;

    if provisioner.check_status().await? {
        println!("'{profile_name}': backend reachable, proxy serving");
        Ok(())
    } else {
        println!("'{profile_name}': backend reachable, proxy NOT serving");
        std::process::exit(crate::error::exit_code::GENERAL);
    }
}
