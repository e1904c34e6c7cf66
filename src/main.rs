//! erp-access - operator CLI for the access core

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use erp_access_core::domain::{PermissionAction, StringUuid};
use erp_access_core::service::TreeScope;
use erp_access_core::state::AppState;
use erp_access_core::{config::Config, migration, telemetry};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

/// erp-access - organization hierarchy and permission tooling
#[derive(Parser, Debug)]
#[command(name = "erp-access")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database if needed and apply pending migrations
    Migrate,

    /// Mark active subscriptions past their end date as expired
    ExpireSubscriptions,

    /// Print a user's effective module permissions
    Resolve {
        /// User id
        #[arg(long)]
        user: Uuid,
    },

    /// Print a user's permissions nested as a menu
    Menu {
        /// User id
        #[arg(long)]
        user: Uuid,
    },

    /// Answer one permission question for a user
    Check {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        module: Uuid,
        /// read, write, delete or approve
        #[arg(long)]
        action: PermissionAction,
    },

    /// Print the branch tree of a company or the unit tree of a branch
    #[command(group(ArgGroup::new("scope").required(true).args(["company", "branch"])))]
    Tree {
        #[arg(long)]
        company: Option<Uuid>,
        #[arg(long)]
        branch: Option<Uuid>,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    telemetry::init(&config.telemetry)?;

    match cli.command {
        Commands::Migrate => {
            migration::run_migrations(&config.database).await?;
            info!("Migrations applied");
        }
        Commands::ExpireSubscriptions => {
            let state = AppState::connect(config).await?;
            let expired = state.subscription_service.expire_overdue().await?;
            print_json(&serde_json::json!({ "expired": expired }))?;
        }
        Commands::Resolve { user } => {
            let state = AppState::connect(config).await?;
            let permissions = state
                .permission_resolver
                .resolve_effective_permissions(StringUuid::from(user))
                .await?;
            print_json(&permissions)?;
        }
        Commands::Menu { user } => {
            let state = AppState::connect(config).await?;
            let menu = state
                .permission_resolver
                .resolve_permission_menu(StringUuid::from(user))
                .await?;
            print_json(&menu)?;
        }
        Commands::Check { user, module, action } => {
            let state = AppState::connect(config).await?;
            let allowed = state
                .permission_resolver
                .check(user.into(), module.into(), action)
                .await?;
            print_json(&serde_json::json!({ "allowed": allowed }))?;
        }
        Commands::Tree { company, branch } => {
            let scope = match (company, branch) {
                (Some(company), _) => TreeScope::Company(company.into()),
                (None, Some(branch)) => TreeScope::Branch(branch.into()),
                (None, None) => anyhow::bail!("either --company or --branch is required"),
            };
            let state = AppState::connect(config).await?;
            let tree = state
                .hierarchy_service
                .build_tree(scope)
                .await
                .context("Failed to build hierarchy tree")?;
            print_json(&tree)?;
        }
    }

    Ok(())
}
