use std::{fs, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use identity::RoleDirectory;
use serde::Serialize;
use server_api::ApiContext;
use shared::{
    domain::{
        AssetId, AssetType, Caller, ControlId, ControlStatus, Criticality, NewAsset, NewControl,
        Role, Severity, TaskStatus, UserId,
    },
    error::{ApiError, ApiException},
    protocol::MutationReceipt,
};
use storage::Storage;

/// Operator tooling that drives the same gateway as the HTTP server.
#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/ot_guardian.db")]
    database_url: String,
    #[arg(long, default_value = "ot-guardian")]
    app_id: String,
    /// Identity the command runs as.
    #[arg(long, default_value = "admin")]
    user_id: String,
    /// Resolve the role from the `[roles]` table of this file instead of `--role`.
    #[arg(long)]
    roles_file: Option<PathBuf>,
    #[arg(long, default_value = "admin")]
    role: Role,
    /// Key shared with the server's `provider_secret` for `issue-token`.
    #[arg(long, env = "APP__PROVIDER_SECRET", default_value = "dev-provider-secret")]
    provider_secret: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    CreateControl {
        name: String,
        description: String,
        #[arg(long, default_value = "Medium")]
        severity: Severity,
    },
    DeleteControl {
        control_id: String,
    },
    CreateAsset {
        name: String,
        #[arg(long)]
        owner: String,
        #[arg(long = "type", default_value = "PLC")]
        asset_type: AssetType,
        #[arg(long, default_value = "Production Line A")]
        location: String,
        #[arg(long, default_value = "High")]
        criticality: Criticality,
    },
    ApplyControl {
        asset_id: String,
        control_id: String,
    },
    SetStatus {
        asset_id: String,
        control_id: String,
        status: ControlStatus,
    },
    SetTaskStatus {
        asset_id: String,
        control_id: String,
        status: TaskStatus,
    },
    Assets,
    Controls,
    Dashboard,
    Tasks,
    /// Prints a custom sign-in token for `POST /session`.
    IssueToken {
        user_id: String,
        #[arg(long, default_value_t = 300)]
        ttl_seconds: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn")
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Command::IssueToken {
        user_id,
        ttl_seconds,
    } = &cli.command
    {
        let user_id = UserId::from(user_id.as_str());
        println!(
            "{}",
            identity::mint_custom_token(&cli.provider_secret, &user_id, *ttl_seconds)?
        );
        return Ok(());
    }

    let caller = resolve_caller(&cli)?;
    let storage = Storage::new(&cli.database_url, &cli.app_id).await?;
    let ctx = ApiContext::new(Arc::new(storage));

    match cli.command {
        Command::CreateControl {
            name,
            description,
            severity,
        } => {
            let draft = NewControl {
                name,
                description,
                severity,
            };
            report(server_api::create_control(&ctx, &caller, draft).await)?;
        }
        Command::DeleteControl { control_id } => {
            let control_id = ControlId::from(control_id);
            report(server_api::delete_control(&ctx, &caller, &control_id).await)?;
        }
        Command::CreateAsset {
            name,
            owner,
            asset_type,
            location,
            criticality,
        } => {
            let draft = NewAsset {
                name,
                asset_type,
                location,
                criticality,
                owner,
            };
            report(server_api::create_asset(&ctx, &caller, draft).await)?;
        }
        Command::ApplyControl {
            asset_id,
            control_id,
        } => {
            let (asset_id, control_id) = (AssetId::from(asset_id), ControlId::from(control_id));
            report(server_api::apply_control(&ctx, &caller, &asset_id, &control_id).await)?;
        }
        Command::SetStatus {
            asset_id,
            control_id,
            status,
        } => {
            let (asset_id, control_id) = (AssetId::from(asset_id), ControlId::from(control_id));
            report(
                server_api::update_control_status(&ctx, &caller, &asset_id, &control_id, status)
                    .await,
            )?;
        }
        Command::SetTaskStatus {
            asset_id,
            control_id,
            status,
        } => {
            let (asset_id, control_id) = (AssetId::from(asset_id), ControlId::from(control_id));
            report(
                server_api::update_task_status(&ctx, &caller, &asset_id, &control_id, status)
                    .await,
            )?;
        }
        Command::Assets => print_json(&server_api::list_assets(&ctx).await.map_err(failure)?)?,
        Command::Controls => print_json(&server_api::list_controls(&ctx).await.map_err(failure)?)?,
        Command::Dashboard => {
            print_json(&server_api::risk_dashboard(&ctx).await.map_err(failure)?)?
        }
        Command::Tasks => print_json(&server_api::list_tasks(&ctx).await.map_err(failure)?)?,
        Command::IssueToken { .. } => {}
    }

    Ok(())
}

fn resolve_caller(cli: &Cli) -> Result<Caller> {
    let user_id = UserId::from(cli.user_id.as_str());
    let role = match &cli.roles_file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read roles file '{}'", path.display()))?;
            RoleDirectory::from_toml_str(&raw)?.resolve(&user_id)
        }
        None => cli.role,
    };
    Ok(Caller::new(user_id, role))
}

fn report<T: Serialize>(result: Result<MutationReceipt<T>, ApiError>) -> Result<()> {
    let receipt = result.map_err(failure)?;
    println!("{}", receipt.message);
    print_json(&receipt.record)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn failure(err: ApiError) -> anyhow::Error {
    ApiException::from(err).into()
}
