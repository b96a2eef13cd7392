//! Alias management commands
//!
//! Aliases are named credential sets for Swift-compatible clusters: an
//! auth endpoint plus user and key, or a pre-issued storage URL and token.

use clap::Subcommand;
use serde::Serialize;

use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use st_core::{Alias, AliasManager, RetryBuilder};

/// Alias subcommands for managing cluster credentials
#[derive(Subcommand, Debug)]
pub enum AliasCommands {
    /// Add or update an alias
    Set(SetArgs),

    /// List all configured aliases
    List(ListArgs),

    /// Remove an alias
    Remove(RemoveArgs),
}

/// Arguments for the `alias set` command
#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Alias name (e.g., "local", "prod")
    pub name: String,

    /// Auth endpoint (e.g., `http://127.0.0.1:8080/auth/v1.0`)
    pub auth_url: String,

    /// Auth user (e.g., `test:tester`)
    pub auth_user: String,

    /// Auth key or password
    pub auth_key: String,

    /// Tenant for v2 auth
    #[arg(long)]
    pub tenant: Option<String>,

    /// Region whose object-store endpoint to use
    #[arg(long)]
    pub region: Option<String>,

    /// Use internal service-network endpoints
    #[arg(long)]
    pub snet: bool,

    /// Pre-issued storage URL; skips authentication together with --auth-token
    #[arg(long, requires = "auth_token")]
    pub storage_url: Option<String>,

    /// Pre-issued auth token
    #[arg(long, requires = "storage_url")]
    pub auth_token: Option<String>,

    /// Total attempts per request, including the first
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// Arguments for the `alias list` command
#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// Show full details including region and retry settings
    #[arg(short, long)]
    pub long: bool,
}

/// Arguments for the `alias remove` command
#[derive(clap::Args, Debug)]
pub struct RemoveArgs {
    /// Name of the alias to remove
    pub name: String,
}

/// JSON output for alias list
#[derive(Serialize)]
struct AliasListOutput {
    aliases: Vec<AliasInfo>,
}

/// Alias information for JSON output (without sensitive data)
#[derive(Serialize)]
struct AliasInfo {
    name: String,
    auth_url: String,
    auth_user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    snet: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    storage_url: Option<String>,
    max_attempts: u32,
}

impl From<&Alias> for AliasInfo {
    fn from(alias: &Alias) -> Self {
        Self {
            name: alias.name.clone(),
            auth_url: alias.auth_url.clone(),
            auth_user: alias.auth_user.clone(),
            region: alias.region.clone(),
            snet: alias.snet,
            storage_url: alias.storage_url.clone(),
            max_attempts: alias.retry_config().max_attempts,
        }
    }
}

/// JSON output for alias set/remove operations
#[derive(Serialize)]
struct AliasOperationOutput {
    success: bool,
    alias: String,
    message: String,
}

/// Execute an alias subcommand
pub async fn execute(cmd: AliasCommands, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let alias_manager = match AliasManager::new() {
        Ok(am) => am,
        Err(e) => {
            formatter.error(&format!("Failed to load aliases: {e}"));
            return ExitCode::GeneralError;
        }
    };

    match cmd {
        AliasCommands::Set(args) => execute_set(args, &alias_manager, &formatter),
        AliasCommands::List(args) => execute_list(args, &alias_manager, &formatter),
        AliasCommands::Remove(args) => execute_remove(args, &alias_manager, &formatter),
    }
}

fn build_alias(args: SetArgs) -> Alias {
    let mut alias = Alias::new(args.name, args.auth_url, args.auth_user, args.auth_key);
    alias.auth_tenant = args.tenant;
    alias.region = args.region;
    alias.snet = args.snet;
    alias.storage_url = args.storage_url;
    alias.auth_token = args.auth_token;
    alias.retry = args
        .max_attempts
        .map(|n| RetryBuilder::new().max_attempts(n).build());
    alias
}

fn execute_set(args: SetArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    if args.name.is_empty() {
        formatter.error("Alias name cannot be empty");
        return ExitCode::UsageError;
    }
    if args.name.contains('/') {
        formatter.error("Alias name cannot contain '/'");
        return ExitCode::UsageError;
    }
    if args.max_attempts == Some(0) {
        formatter.error("--max-attempts must be at least 1");
        return ExitCode::UsageError;
    }

    let alias = build_alias(args);
    if let Err(e) = alias.validate() {
        formatter.error(&e.to_string());
        return ExitCode::UsageError;
    }

    let name = alias.name.clone();
    match manager.set(alias) {
        Ok(()) => {
            if formatter.is_json() {
                let output = AliasOperationOutput {
                    success: true,
                    alias: name.clone(),
                    message: format!("Alias '{name}' configured successfully"),
                };
                formatter.json(&output);
            } else {
                let styled_name = formatter.style_name(&name);
                formatter.success(&format!("Alias '{styled_name}' configured successfully."));
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::GeneralError
        }
    }
}

fn execute_list(args: ListArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    match manager.list() {
        Ok(aliases) => {
            if formatter.is_json() {
                let output = AliasListOutput {
                    aliases: aliases.iter().map(AliasInfo::from).collect(),
                };
                formatter.json(&output);
            } else if aliases.is_empty() {
                formatter.println("No aliases configured.");
            } else {
                for alias in &aliases {
                    let styled_name = formatter.style_name(&format!("{:<12}", alias.name));
                    let url = alias.storage_url.as_deref().unwrap_or(&alias.auth_url);
                    let styled_url = formatter.style_url(url);
                    if args.long {
                        let details = format!(
                            "(user: {}, region: {}, snet: {}, attempts: {})",
                            alias.auth_user,
                            alias.region.as_deref().unwrap_or("-"),
                            alias.snet,
                            alias.retry_config().max_attempts
                        );
                        formatter.println(&format!(
                            "{styled_name} {styled_url} {}",
                            formatter.style_dim(&details)
                        ));
                    } else {
                        formatter.println(&format!("{styled_name} {styled_url}"));
                    }
                }
            }
            ExitCode::Success
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::GeneralError
        }
    }
}

fn execute_remove(args: RemoveArgs, manager: &AliasManager, formatter: &Formatter) -> ExitCode {
    match manager.remove(&args.name) {
        Ok(()) => {
            if formatter.is_json() {
                let output = AliasOperationOutput {
                    success: true,
                    alias: args.name.clone(),
                    message: format!("Alias '{}' removed successfully", args.name),
                };
                formatter.json(&output);
            } else {
                let styled_name = formatter.style_name(&args.name);
                formatter.success(&format!("Alias '{styled_name}' removed successfully."));
            }
            ExitCode::Success
        }
        Err(st_core::Error::AliasNotFound(_)) => {
            formatter.error(&format!("Alias '{}' not found", args.name));
            ExitCode::NotFound
        }
        Err(e) => {
            formatter.error(&e.to_string());
            ExitCode::GeneralError
        }
    }
}
