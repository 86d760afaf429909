//! Tenant administration tool.
//!
//! Manages the tenants of a SQLite data directory: create, deactivate, list,
//! retry and reconcile.

use clap::{Parser, Subcommand};
use helios_tenancy::backends::sqlite::{SqliteEngine, SqliteEngineConfig};
use helios_tenancy::{TenancyConfig, TenantId, TenantRecord, TenantRouter};
use tracing::info;

/// Command line arguments for `tenant-admin`.
#[derive(Debug, Parser)]
#[command(name = "tenant-admin")]
#[command(about = "Manage Helios tenants and their storage instances")]
struct Cli {
    /// Directory holding the tenant databases and the control plane.
    #[arg(long, env = "HFS_TENANT_DATA_DIR", default_value = "./data/tenants")]
    data_dir: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "HFS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a tenant and provision its storage instance.
    Create {
        /// Display name of the new tenant.
        name: String,
    },
    /// Deactivate a tenant.
    Deactivate {
        /// Tenant ID.
        id: String,
    },
    /// List all tenants.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Retry provisioning for a PROVISIONING or FAILED tenant.
    Retry {
        /// Tenant ID.
        id: String,
    },
    /// Re-drive every unfinished tenant.
    Reconcile,
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("helios_tenancy={},tenant_admin={}", level, level)));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_record(record: &TenantRecord) {
    println!(
        "{:<36}  {:<12}  {:<32}  {}",
        record.id.as_str(),
        record.status.as_str(),
        record.storage_instance_name,
        record.display_name
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let config = TenancyConfig::from_env()?;
    let mut engine_config = SqliteEngineConfig::from_env()?;
    engine_config.data_dir = cli.data_dir.clone().into();

    info!(data_dir = %cli.data_dir, "Opening tenant data directory");
    let router: TenantRouter<SqliteEngine> = TenantRouter::sqlite(engine_config, config)?;

    match cli.command {
        Command::Create { name } => {
            let record = router.create_tenant(&name).await?;
            print_record(&record);
        }
        Command::Deactivate { id } => {
            let record = router.deactivate_tenant(&TenantId::new(id)).await?;
            print_record(&record);
        }
        Command::List { json } => {
            let tenants = router.list_tenants().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tenants)?);
            } else {
                for record in &tenants {
                    print_record(record);
                }
            }
        }
        Command::Retry { id } => {
            let record = router.retry_provisioning(&TenantId::new(id)).await?;
            print_record(&record);
        }
        Command::Reconcile => {
            let outcomes = router.reconcile().await?;
            let mut unfinished = 0;
            for outcome in &outcomes {
                match &outcome.result {
                    Ok(status) => println!("{:<36}  {}", outcome.tenant_id.as_str(), status),
                    Err(e) => {
                        unfinished += 1;
                        println!("{:<36}  error: {}", outcome.tenant_id.as_str(), e);
                    }
                }
            }
            info!(
                reconciled = outcomes.len() - unfinished,
                unfinished, "Reconciliation finished"
            );
            if unfinished > 0 {
                anyhow::bail!("{} tenant(s) could not be provisioned", unfinished);
            }
        }
    }

    Ok(())
}
