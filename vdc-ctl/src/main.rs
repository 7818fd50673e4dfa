//! vdc-ctl: operator CLI for the virtual datacenter API.
//!
//! - Power control of single servers (status, start, stop, shutdown)
//! - Dry-run plans from desired/current server snapshots
//! - Reconciling and detaching servers
//! - Composing firewall rule sets with the default inbound block

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vdc_client::{
    AddressFamily, Client, ClientConfig, FirewallRule, ObjectId, RequestContext, ResourceKind,
};
use vdc_reconcile::{
    plan, FirewallRuleComposer, PowerOrchestrator, Reconciler, ServerChange, ServerConfig,
    ServerRelationReconciler,
};

/// vdc operator CLI
#[derive(Parser, Debug)]
#[command(name = "vdc-ctl", version, about)]
struct Args {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Overall deadline for the command in seconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

/// API endpoint, credentials and client behavior.
#[derive(clap::Args, Debug)]
struct ConnectionArgs {
    /// API base URL
    #[arg(long, env = "VDC_API_URL")]
    api_url: Option<String>,

    /// API user id
    #[arg(long, env = "VDC_USER_ID")]
    user_id: Option<String>,

    /// API token
    #[arg(long, env = "VDC_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    /// JSON client configuration file (replaces the three flags above)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Return after the API accepted a mutation instead of waiting for it
    #[arg(long = "async")]
    asynchronous: bool,

    /// Override the retry cap
    #[arg(long)]
    max_retries: Option<u32>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the operations a reconcile would send, without contacting the API
    Plan {
        /// Desired server configuration (JSON)
        #[arg(long)]
        desired: PathBuf,

        /// Last applied server configuration (JSON), empty if omitted
        #[arg(long)]
        current: Option<PathBuf>,
    },

    /// Firewall rule helpers
    Firewall {
        #[command(subcommand)]
        action: FirewallAction,
    },

    #[command(flatten)]
    Api(ApiCommand),
}

/// Commands that talk to the API.
#[derive(Subcommand, Debug)]
enum ApiCommand {
    /// Server power control
    Power {
        #[command(subcommand)]
        action: PowerAction,
    },

    /// Apply a desired configuration to a server
    Reconcile {
        /// Server id
        server: String,

        /// Desired server configuration (JSON)
        #[arg(long)]
        desired: PathBuf,

        /// Last applied server configuration (JSON), empty if omitted
        #[arg(long)]
        current: Option<PathBuf>,
    },

    /// Unlink every relation of a server
    Detach {
        /// Server id
        server: String,
    },

    /// Check whether an object exists
    Exists {
        kind: Kind,
        id: String,
    },

    /// Delete an object
    Delete {
        kind: Kind,
        id: String,
    },
}

#[derive(Subcommand, Debug)]
enum PowerAction {
    /// Show power state
    Status { server: String },
    /// Power on
    Start { server: String },
    /// Hard power off
    Stop { server: String },
    /// Graceful shutdown, forcing off if the guest does not stop in time
    Shutdown { server: String },
}

#[derive(Subcommand, Debug)]
enum FirewallAction {
    /// Append the default inbound block to a JSON list of user rules
    Compose {
        /// Rules file (JSON array)
        rules: PathBuf,

        #[arg(long, value_enum, default_value = "v4")]
        family: Family,
    },
    /// Remove the default inbound block from a JSON list of rules
    Strip {
        /// Rules file (JSON array)
        rules: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Family {
    V4,
    V6,
}

impl From<Family> for AddressFamily {
    fn from(family: Family) -> Self {
        match family {
            Family::V4 => AddressFamily::V4,
            Family::V6 => AddressFamily::V6,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Kind {
    Server,
    Storage,
    Network,
    Ip,
    Isoimage,
    Firewall,
    Loadbalancer,
    PaasService,
    Template,
}

impl From<Kind> for ResourceKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Server => ResourceKind::Server,
            Kind::Storage => ResourceKind::Storage,
            Kind::Network => ResourceKind::Network,
            Kind::Ip => ResourceKind::IpAddress,
            Kind::Isoimage => ResourceKind::IsoImage,
            Kind::Firewall => ResourceKind::Firewall,
            Kind::Loadbalancer => ResourceKind::LoadBalancer,
            Kind::PaasService => ResourceKind::PaasService,
            Kind::Template => ResourceKind::Template,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vdc_ctl=info,vdc_client=info,vdc_reconcile=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let command = match args.command {
        Command::Plan { desired, current } => {
            let change = load_change(&desired, current.as_deref()).await?;
            change.desired.validate()?;
            for op in plan(&change) {
                println!("{}", op);
            }
            return Ok(());
        }
        Command::Firewall { action } => return firewall(&action).await,
        Command::Api(command) => command,
    };

    let client = Client::new(client_config(&args.connection).await?)?;

    let mut ctx = RequestContext::new();
    if let Some(secs) = args.timeout {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }
    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });

    run(&client, &ctx, command).await
}

async fn run(client: &Client, ctx: &RequestContext, command: ApiCommand) -> Result<()> {
    match command {
        ApiCommand::Power { action } => {
            let power = PowerOrchestrator::new(client.clone());
            let (server, transition) = match action {
                PowerAction::Status { server } => {
                    let server = parse_id(&server)?;
                    let model = power.status(ctx, server).await?;
                    println!(
                        "server {}: {} (hot update {})",
                        server,
                        if model.running { "running" } else { "stopped" },
                        if model.supports_hot_update { "supported" } else { "unsupported" }
                    );
                    return Ok(());
                }
                PowerAction::Start { server } => {
                    let server = parse_id(&server)?;
                    (server, power.start(ctx, server).await?)
                }
                PowerAction::Stop { server } => {
                    let server = parse_id(&server)?;
                    (server, power.stop(ctx, server).await?)
                }
                PowerAction::Shutdown { server } => {
                    let server = parse_id(&server)?;
                    (server, power.shutdown(ctx, server).await?)
                }
            };
            println!("server {}: {:?}", server, transition);
        }
        ApiCommand::Reconcile {
            server,
            desired,
            current,
        } => {
            let server = parse_id(&server)?;
            let change = load_change(&desired, current.as_deref()).await?;
            let report = ServerRelationReconciler::new(client.clone())
                .reconcile(ctx, &server, &change)
                .await?;

            for op in &report.applied {
                println!("{}", op);
            }
            info!(
                "Server {}: {} applied, {} already linked, shutdown {}, power {:?}",
                server,
                report.mutations(),
                report.skipped_links,
                report.shutdown_performed,
                report.power
            );
        }
        ApiCommand::Detach { server } => {
            let server = parse_id(&server)?;
            ServerRelationReconciler::new(client.clone())
                .finalize(ctx, &server)
                .await?;
            println!("server {}: detached", server);
        }
        ApiCommand::Exists { kind, id } => {
            let id = parse_id(&id)?;
            let kind = ResourceKind::from(kind);
            let exists = client.probe().object_exists(ctx, kind, id).await?;
            println!("{}", exists);
        }
        ApiCommand::Delete { kind, id } => {
            let id = parse_id(&id)?;
            let kind = ResourceKind::from(kind);
            match client.delete_object(ctx, kind, id).await? {
                Some(outcome) if outcome.is_pending() => println!("{} {}: delete accepted", kind, id),
                Some(_) => println!("{} {}: deleted", kind, id),
                None => println!("{} {}: already absent", kind, id),
            }
        }
    }
    Ok(())
}

async fn firewall(action: &FirewallAction) -> Result<()> {
    let (rules, family) = match action {
        FirewallAction::Compose { rules, family } => (rules, Some(*family)),
        FirewallAction::Strip { rules } => (rules, None),
    };
    let rules: Vec<FirewallRule> = read_json(rules).await?;

    let out = match family {
        Some(family) => FirewallRuleComposer::compose(&rules, family.into()),
        None => FirewallRuleComposer::strip(&rules),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

async fn client_config(args: &ConnectionArgs) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("read {}", path.display()))?;
            ClientConfig::from_json(&raw)?
        }
        None => {
            let (Some(url), Some(user), Some(token)) = (&args.api_url, &args.user_id, &args.api_token)
            else {
                bail!("--api-url, --user-id and --api-token (or --config) are required");
            };
            ClientConfig::new(url.clone(), user.clone(), token.clone())
        }
    };

    if args.asynchronous {
        config = config.with_synchronous(false);
    }
    if let Some(retries) = args.max_retries {
        config = config.with_max_retries(retries);
    }
    Ok(config)
}

async fn load_change(desired: &Path, current: Option<&Path>) -> Result<ServerChange> {
    let desired: ServerConfig = read_json(desired).await?;
    let current: ServerConfig = match current {
        Some(path) => read_json(path).await?,
        None => ServerConfig::default(),
    };
    Ok(ServerChange::new(desired, current))
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse {}", path.display()))
}

fn parse_id(raw: &str) -> Result<ObjectId> {
    Ok(ObjectId::parse(raw)?)
}
