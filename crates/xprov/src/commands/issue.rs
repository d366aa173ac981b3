use tracing::debug;

use xprov_core::{Protocol, ProvisionOutcome, Provisioner, UpsertRequest};

use crate::cli::{GlobalOpts, IssueArgs};
use crate::config;
use crate::error::CliError;

pub async fn handle(args: IssueArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (profile_name, engine_config) = config::resolve_engine_config(global)?;
    let provisioner = Provisioner::from_config(&engine_config)?;

    let protocol = match args.protocol.as_deref() {
        None => None,
        Some(raw) => Some(raw.parse::<Protocol>().map_err(|_| CliError::Validation {
            field: "protocol".into(),
            reason: format!("expected 'vless' or 'vmess', got '{raw}'"),
        })?),
    };

    debug!(profile = %profile_name, "issuing credential");
    let receipt = provisioner
        .upsert(UpsertRequest {
            client_id: args.uuid,
            email: args.email,
            protocol,
            port: args.port,
            inbound_id: args.inbound,
        })
        .await?;

    // The URI is the artifact: stdout stays pipeable, details go to stderr.
    println!("{}", receipt.uri);
    eprintln!(
        "client {} ({}) on '{profile_name}': {} at stage {}",
        receipt.client_id, receipt.email, receipt.outcome, receipt.stage
    );
    match receipt.outcome {
        ProvisionOutcome::PartialWrite => eprintln!(
            "warning: one backend surface was not updated; the credential may stop \
             working after the next panel restart"
        ),
        ProvisionOutcome::WrittenNotVerified => eprintln!(
            "note: the write is in place but was not confirmed by the verification \
             read; it should converge on the next resync"
        ),
        ProvisionOutcome::Verified | ProvisionOutcome::Failed => {}
    }
    Ok(())
}
