// Command-line surface.

use clap::{ArgAction, Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "xprov",
    version,
    about = "Issue and reconcile proxy tunnel credentials (VLESS/VMess)"
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Deployment profile from the config file.
    #[arg(long, short, global = true, env = "XPROV_PROFILE")]
    pub profile: Option<String>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Accept self-signed TLS certificates on the panel.
    #[arg(long, short = 'k', global = true, env = "XPROV_INSECURE")]
    pub insecure: bool,

    /// Request timeout in seconds (overrides the profile).
    #[arg(long, global = true, env = "XPROV_TIMEOUT")]
    pub timeout: Option<u64>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Provision a client and print its connection URI.
    Issue(IssueArgs),

    /// Remove an issued client. Removing an unknown id still succeeds.
    Revoke(RevokeArgs),

    /// Inspect the target inbound as the backend sees it.
    Inbound(InboundArgs),

    /// Probe whether the panel and proxy are reachable.
    Status,

    /// Manage the configuration file.
    Config(ConfigArgs),
}

#[derive(Debug, Args)]
pub struct IssueArgs {
    /// Client identifier; a fresh one is generated when omitted.
    #[arg(long)]
    pub uuid: Option<Uuid>,

    /// Email/label for the client; derived from the id when omitted.
    #[arg(long)]
    pub email: Option<String>,

    /// Protocol override: vless or vmess.
    #[arg(long)]
    pub protocol: Option<String>,

    /// Port override for inbound targeting.
    #[arg(long)]
    pub port: Option<u16>,

    /// Inbound id override.
    #[arg(long)]
    pub inbound: Option<u32>,
}

#[derive(Debug, Args)]
pub struct RevokeArgs {
    /// The client identifier to remove.
    pub uuid: Uuid,
}

#[derive(Debug, Args)]
pub struct InboundArgs {
    #[command(subcommand)]
    pub command: InboundCommand,
}

#[derive(Debug, Subcommand)]
pub enum InboundCommand {
    /// Print the inbound as JSON.
    Show {
        /// Inbound id; the profile's configured inbound when omitted.
        #[arg(long)]
        id: Option<u32>,
    },
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path.
    Path,
    /// Print the loaded configuration with secrets masked.
    Show,
    /// Write a starter config file.
    Init,
}
