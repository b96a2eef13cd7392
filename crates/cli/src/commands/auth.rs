//! auth command - Authenticate and show the storage endpoint

use clap::Args;
use serde::Serialize;

use super::{GlobalOptions, connect, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};

/// Authenticate against an alias and print its storage URL
#[derive(Args, Debug)]
pub struct AuthArgs {
    /// Alias to authenticate
    pub alias: String,
}

#[derive(Debug, Serialize)]
struct AuthOutput {
    alias: String,
    storage_url: String,
    /// Token prefix only
    auth_token: String,
}

/// Execute the auth command
pub async fn execute(args: AuthArgs, global: &GlobalOptions, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let alias = args.alias.trim_end_matches('/');

    let orchestrator = match connect(alias, global, &formatter) {
        Ok(o) => o,
        Err(code) => return code,
    };

    // Bypass any cached token.
    let endpoint = match orchestrator.session().tokens().refresh().await {
        Ok(e) => e,
        Err(e) => return report(&formatter, "Authentication failed", &e),
    };

    if formatter.is_json() {
        formatter.json(&AuthOutput {
            alias: alias.to_string(),
            storage_url: endpoint.storage_url.clone(),
            auth_token: endpoint.masked_token(),
        });
    } else {
        formatter.println(&format!(
            "{} {}",
            formatter.style_key("Storage URL:"),
            formatter.style_url(&endpoint.storage_url)
        ));
        formatter.println(&format!(
            "{} {}",
            formatter.style_key("Auth Token: "),
            endpoint.masked_token()
        ));
    }
    ExitCode::Success
}
