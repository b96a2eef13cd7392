//! delete command - Remove an object or a container
//!
//! Deleting a manifest leaves its segments in `<container>_segments`. A
//! container must be empty unless `--recursive` removes its objects first.

use clap::Args;
use serde::Serialize;

use super::{GlobalOptions, connect, parse_container_path, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, Progress};
use st_core::ObjectPath;

/// Delete an object or a container
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Object or container to delete (alias/container[/object])
    pub path: String,

    /// Delete every object in the container before the container itself
    #[arg(short, long)]
    pub recursive: bool,

    /// Keep listing and deleting until the container reports no objects
    #[arg(long, requires = "recursive")]
    pub until_empty: bool,
}

#[derive(Debug, Serialize)]
struct DeleteOutput {
    deleted: Vec<String>,
}

/// Execute the delete command
pub async fn execute(
    args: DeleteArgs,
    global: &GlobalOptions,
    output_config: OutputConfig,
) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let remote = match parse_container_path(&args.path, &formatter) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let orchestrator = match connect(&remote.alias, global, &formatter) {
        Ok(o) => o,
        Err(code) => return code,
    };

    let result = if remote.object.is_empty() {
        let container = remote.container.as_str();
        let progress = Progress::spinner(&formatter, &format!("Deleting {container}"));
        let result = async {
            let mut deleted = Vec::new();
            if args.recursive {
                deleted = orchestrator
                    .empty_container(container, args.until_empty)
                    .await?
                    .into_iter()
                    .map(|name| ObjectPath::new(container, name).to_string())
                    .collect();
            }
            orchestrator.delete_container(container).await?;
            deleted.push(container.to_string());
            Ok::<_, st_core::Error>(deleted)
        }
        .await;
        progress.finish();
        result
    } else {
        let object = ObjectPath::new(&remote.container, &remote.object);
        orchestrator
            .delete(&object)
            .await
            .map(|()| vec![object.to_string()])
    };

    match result {
        Ok(deleted) => {
            if formatter.is_json() {
                formatter.json(&DeleteOutput { deleted });
            } else {
                for name in &deleted {
                    formatter.success(&format!("Removed {}", formatter.style_name(name)));
                }
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, &format!("Failed to delete {remote}"), &e),
    }
}
