//! st - command-line client for Swift-style object storage
//!
//! Uploads larger than the segment size are split into segments and tied
//! together with a dynamic or static manifest; downloads reassemble them in
//! order.

mod commands;
mod exit_code;
mod output;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::GlobalOptions;
use commands::alias::AliasCommands;
use exit_code::ExitCode;
use output::OutputConfig;

#[derive(Parser, Debug)]
#[command(name = "st", version, about, long_about = None)]
pub struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log requests, retries, and transfer state changes to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Maximum simultaneous requests
    #[arg(long, global = true, env = "STRATUS_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Retries per request after the first attempt
    #[arg(long, global = true, env = "STRATUS_RETRIES")]
    pub retries: Option<u32>,

    /// Keep the storage URL and token on disk between runs
    #[arg(long, global = true, env = "STRATUS_CACHE_AUTH")]
    pub cache_auth: bool,

    /// Auth endpoint, overriding the alias
    #[arg(long, global = true, env = "STRATUS_AUTH_URL", hide_env_values = true)]
    pub auth_url: Option<String>,

    /// Auth user, overriding the alias
    #[arg(long, global = true, env = "STRATUS_AUTH_USER", hide_env_values = true)]
    pub auth_user: Option<String>,

    /// Auth key, overriding the alias
    #[arg(long, global = true, env = "STRATUS_AUTH_KEY", hide_env_values = true)]
    pub auth_key: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage cluster aliases
    #[command(subcommand)]
    Alias(AliasCommands),

    /// Authenticate and show the storage URL
    Auth(commands::auth::AuthArgs),

    /// Show object metadata
    Head(commands::head::HeadArgs),

    /// Download an object
    Get(commands::get::GetArgs),

    /// Upload a file, directory, or stdin
    Put(commands::put::PutArgs),

    /// Delete an object
    Delete(commands::delete::DeleteArgs),

    /// Generate shell completions
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    fn output_config(&self) -> OutputConfig {
        OutputConfig {
            json: self.json,
            no_color: self.no_color,
            quiet: self.quiet,
        }
    }

    fn global_options(&self) -> GlobalOptions {
        GlobalOptions {
            concurrency: self.concurrency,
            retries: self.retries,
            cache_auth: self.cache_auth,
            auth_url: self.auth_url.clone(),
            auth_user: self.auth_user.clone(),
            auth_key: self.auth_key.clone(),
        }
    }
}

fn init_tracing(verbose: bool) -> anyhow::Result<()> {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}

async fn run(cli: Cli) -> ExitCode {
    let output_config = cli.output_config();
    let global = cli.global_options();

    match cli.command {
        Commands::Alias(cmd) => commands::alias::execute(cmd, output_config).await,
        Commands::Auth(args) => commands::auth::execute(args, &global, output_config).await,
        Commands::Head(args) => commands::head::execute(args, &global, output_config).await,
        Commands::Get(args) => commands::get::execute(args, &global, output_config).await,
        Commands::Put(args) => commands::put::execute(args, &global, output_config).await,
        Commands::Delete(args) => commands::delete::execute(args, &global, output_config).await,
        Commands::Completions(args) => commands::completions::execute(args),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let code = run(cli).await;
    if code != ExitCode::Success {
        std::process::exit(code.code());
    }
    Ok(())
}
