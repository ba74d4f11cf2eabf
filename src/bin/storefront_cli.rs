use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use storefront_api::{
    auth::{AuthConfig, AuthService, ROLE_CUSTOMER},
    config::{self, AppConfig},
    db,
    migrator,
    services::inventory::{InventoryLedger, Reservation, SeaOrmInventoryLedger},
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "storefront-cli", about = "Operator tooling for the storefront API", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations
    Migrate,
    /// Sign an access token for a user
    IssueToken {
        #[arg(long)]
        user_id: String,
        #[arg(long)]
        email: Option<String>,
        /// Role to grant; repeat for several roles (defaults to customer)
        #[arg(long = "role")]
        roles: Vec<String>,
    },
    #[command(subcommand)]
    Holds(HoldsCommands),
}

/// Inventory holds left behind by interrupted checkouts
#[derive(Subcommand)]
enum HoldsCommands {
    /// List holds still open after the cutoff
    List {
        #[arg(long, default_value_t = 30)]
        older_than_minutes: i64,
    },
    /// Return stale holds to stock
    Release {
        #[arg(long, default_value_t = 30)]
        older_than_minutes: i64,
    },
}

#[derive(Serialize)]
struct HoldRow {
    id: Uuid,
    checkout_id: Uuid,
    variant_id: Uuid,
    quantity: i32,
    created_at: chrono::DateTime<Utc>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    match cli.command {
        Commands::Migrate => {
            migrator::run_migration(&cfg.database_url).await?;
            println!("Migrations applied");
        }
        Commands::IssueToken {
            user_id,
            email,
            roles,
        } => {
            let roles = if roles.is_empty() {
                vec![ROLE_CUSTOMER.to_string()]
            } else {
                roles
            };
            let auth = AuthService::new(AuthConfig::from(&cfg));
            let token = auth
                .issue_token(&user_id, email, roles)
                .context("failed to sign token")?;
            if cli.json {
                print_json(&serde_json::json!({ "access_token": token }))?;
            } else {
                println!("{}", token);
            }
        }
        Commands::Holds(command) => handle_holds(&cfg, command, cli.json).await?,
    }

    Ok(())
}

async fn handle_holds(cfg: &AppConfig, command: HoldsCommands, json: bool) -> Result<()> {
    let pool = db::establish_connection_from_app_config(cfg)
        .await
        .context("failed to connect to database")?;
    let ledger = SeaOrmInventoryLedger::new(Arc::new(pool));

    match command {
        HoldsCommands::List { older_than_minutes } => {
            let cutoff = Utc::now() - Duration::minutes(older_than_minutes);
            let rows: Vec<HoldRow> = ledger
                .stale_holds(cutoff)
                .await?
                .into_iter()
                .map(|hold| HoldRow {
                    id: hold.id,
                    checkout_id: hold.checkout_id,
                    variant_id: hold.variant_id,
                    quantity: hold.quantity,
                    created_at: hold.created_at,
                })
                .collect();

            if json {
                print_json(&rows)?;
            } else if rows.is_empty() {
                println!("No stale holds");
            } else {
                for row in rows {
                    println!(
                        "{}  checkout {}  variant {}  qty {}  since {}",
                        row.id, row.checkout_id, row.variant_id, row.quantity, row.created_at
                    );
                }
            }
        }
        HoldsCommands::Release { older_than_minutes } => {
            let cutoff = Utc::now() - Duration::minutes(older_than_minutes);
            let holds = ledger.stale_holds(cutoff).await?;
            let mut released = 0usize;
            for hold in holds {
                let reservation = Reservation::from(hold);
                match ledger.release(&reservation).await {
                    Ok(()) => released += 1,
                    Err(e) => eprintln!("failed to release hold {}: {}", reservation.id, e),
                }
            }
            if json {
                print_json(&serde_json::json!({ "released": released }))?;
            } else {
                println!("Released {} holds", released);
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
