//! get command - Download an object or everything under a prefix
//!
//! Segmented objects are reassembled in order; the bytes go to stdout or to
//! a local file. With `--all-objects` every object under the path lands in a
//! local directory.

use std::path::PathBuf;

use clap::Args;
use futures::TryStreamExt;
use serde::Serialize;

use super::{GlobalOptions, connect, parse_container_path, parse_object_path, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, Progress};
use st_core::{ByteStream, Downloaded, ManifestKind, TransferSpec};

/// Download an object
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Object to download (alias/container/object), or with --all-objects
    /// a container and optional prefix
    pub path: String,

    /// Write to this file instead of stdout; with --all-objects, the directory
    /// to download into (default: current directory)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Download every object in the container whose name starts with the path
    #[arg(short, long)]
    pub all_objects: bool,
}

#[derive(Debug, Serialize)]
struct GetOutput {
    path: String,
    file: String,
    size_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    manifest: Option<ManifestKind>,
    segments: usize,
}

#[derive(Debug, Serialize)]
struct GetAllOutput {
    results: Vec<Downloaded>,
}

/// Execute the get command
pub async fn execute(args: GetArgs, global: &GlobalOptions, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    if args.all_objects {
        return get_all(args, global, &formatter).await;
    }
    let (remote, object) = match parse_object_path(&args.path, &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let orchestrator = match connect(&remote.alias, global, &formatter) {
        Ok(o) => o,
        Err(code) => return code,
    };

    let download = match orchestrator.download(TransferSpec::download(object.clone())).await {
        Ok(d) => d,
        Err(e) => return report(&formatter, &format!("Failed to download {object}"), &e),
    };
    let manifest = download.manifest;
    let segments = download.segments;

    let Some(dest) = args.output else {
        // Progress and status would interleave with the data on stdout.
        let mut stdout = tokio::io::stdout();
        return match download.stream.write_to(&mut stdout).await {
            Ok(_) => ExitCode::Success,
            Err(e) => report(&formatter, &format!("Failed to download {object}"), &e),
        };
    };

    let progress = Progress::bytes(&formatter, download.content_length, &object.to_string());
    let counted = {
        let progress = progress.clone();
        ByteStream::new(
            download
                .stream
                .inspect_ok(move |chunk| progress.inc(chunk.len() as u64)),
        )
    };
    let result = orchestrator.save(&object, counted, &dest).await;
    progress.finish();

    match result {
        Ok(size) => {
            if formatter.is_json() {
                formatter.json(&GetOutput {
                    path: object.to_string(),
                    file: dest.display().to_string(),
                    size_bytes: size,
                    manifest,
                    segments,
                });
            } else {
                formatter.success(&format!(
                    "{} -> {} ({})",
                    formatter.style_name(&object.to_string()),
                    dest.display(),
                    formatter.style_size(size)
                ));
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, &format!("Failed to download {object}"), &e),
    }
}

async fn get_all(args: GetArgs, global: &GlobalOptions, formatter: &Formatter) -> ExitCode {
    let remote = match parse_container_path(&args.path, formatter) {
        Ok(r) => r,
        Err(code) => return code,
    };
    let orchestrator = match connect(&remote.alias, global, formatter) {
        Ok(o) => o,
        Err(code) => return code,
    };
    let dir = args.output.unwrap_or_else(|| PathBuf::from("."));

    let progress = Progress::spinner(formatter, &format!("Downloading {remote}"));
    let result = orchestrator
        .download_tree(&remote.container, &remote.object, &dir)
        .await;
    progress.finish();

    match result {
        Ok(results) => {
            if formatter.is_json() {
                formatter.json(&GetAllOutput { results });
            } else {
                for d in &results {
                    formatter.success(&format!(
                        "{} -> {} ({})",
                        formatter.style_name(&d.path),
                        d.file.display(),
                        formatter.style_size(d.size_bytes)
                    ));
                }
            }
            ExitCode::Success
        }
        Err(e) => report(formatter, &format!("Failed to download {remote}"), &e),
    }
}
