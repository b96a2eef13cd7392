//! put command - Upload a file, a directory, or piped input
//!
//! Inputs larger than the segment size become segmented large objects with a
//! dynamic manifest, or a static one when the size carries an `s` prefix.

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use super::{GlobalOptions, connect, load_config, parse_object_path, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig, Progress};
use st_core::{
    Headers, ObjectPath, Orchestrator, Result, SegmentSetting, TransferSpec, UploadCondition,
    UploadOptions, UploadOutcome,
};

/// Upload to an object
#[derive(Args, Debug)]
pub struct PutArgs {
    /// Destination (alias/container/object)
    pub path: String,

    /// File or directory to upload; `-` or absent reads stdin
    #[arg(short, long)]
    pub input: Option<String>,

    /// Segment size in bytes; prefix with `s` for a static manifest (e.g. s1048576)
    #[arg(short, long)]
    pub segment_size: Option<SegmentSetting>,

    /// Only upload when the local file is newer than the stored object
    #[arg(long, conflicts_with = "different")]
    pub newer: bool,

    /// Only upload when size or modification time differ
    #[arg(long)]
    pub different: bool,

    /// Segment piped input by size (not supported; fails before sending anything)
    #[arg(long)]
    pub stdin_segmentation: bool,

    /// Extra header for the object, as `Name: value`
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
struct PutOutput {
    results: Vec<UploadOutcome>,
}

fn parse_header(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("'{s}' is not of the form 'Name: value'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("'{s}' has an empty header name"));
    }
    Ok((name.to_ascii_lowercase(), value.trim().to_string()))
}

impl PutArgs {
    fn upload_options(&self, mut options: UploadOptions) -> UploadOptions {
        if let Some(setting) = self.segment_size {
            options = options.segment_setting(setting);
        }
        options.condition = if self.newer {
            UploadCondition::Newer
        } else if self.different {
            UploadCondition::Different
        } else {
            UploadCondition::Always
        };
        options.stream_segmentation = self.stdin_segmentation;
        options.headers = self.headers.iter().cloned().collect::<Headers>();
        options
    }
}

/// Execute the put command
pub async fn execute(args: PutArgs, global: &GlobalOptions, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let (remote, object) = match parse_object_path(&args.path, &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let config = match load_config(&formatter) {
        Ok(c) => c,
        Err(code) => return code,
    };
    let options = args.upload_options(UploadOptions::from(&config.defaults));
    let orchestrator = match connect(&remote.alias, global, &formatter) {
        Ok(o) => o,
        Err(code) => return code,
    };

    let progress = Progress::spinner(&formatter, &format!("Uploading {object}"));
    let result = upload(&orchestrator, &object, args.input.as_deref(), &options).await;
    progress.finish();

    match result {
        Ok(results) => {
            if formatter.is_json() {
                formatter.json(&PutOutput { results });
            } else {
                for outcome in &results {
                    print_outcome(outcome, &formatter);
                }
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, &format!("Failed to upload {object}"), &e),
    }
}

async fn upload(
    orchestrator: &Orchestrator,
    object: &ObjectPath,
    input: Option<&str>,
    options: &UploadOptions,
) -> Result<Vec<UploadOutcome>> {
    let spec = match input {
        None | Some("-") => TransferSpec::from_reader(object.clone(), tokio::io::stdin(), options),
        Some(path) => {
            let path = PathBuf::from(path);
            if tokio::fs::metadata(&path).await?.is_dir() {
                return orchestrator.upload_tree(&path, object, options).await;
            }
            TransferSpec::from_file(object.clone(), &path, options).await?
        }
    };
    Ok(vec![orchestrator.upload(spec).await?])
}

fn print_outcome(outcome: &UploadOutcome, formatter: &Formatter) {
    match outcome {
        UploadOutcome::Uploaded {
            path, size_bytes, ..
        } => {
            let size = size_bytes
                .map(|s| format!(" ({})", formatter.style_size(s)))
                .unwrap_or_default();
            formatter.success(&format!("{}{size}", formatter.style_name(path)));
        }
        UploadOutcome::Segmented {
            path,
            size_bytes,
            manifest,
            segments,
        } => {
            formatter.success(&format!(
                "{} ({}, {segments} segments, {manifest} manifest)",
                formatter.style_name(path),
                formatter.style_size(*size_bytes)
            ));
        }
        UploadOutcome::Skipped { path, reason } => {
            formatter.println(&format!(
                "- {} {}",
                formatter.style_name(path),
                formatter.style_dim(&format!("skipped: {reason}"))
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::ManifestKind;

    fn args() -> PutArgs {
        PutArgs {
            path: "dev/c/o".into(),
            input: None,
            segment_size: None,
            newer: false,
            different: false,
            stdin_segmentation: false,
            headers: vec![],
        }
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Object-Meta-Color: blue").unwrap(),
            ("x-object-meta-color".into(), "blue".into())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }

    #[test]
    fn test_static_segment_setting_selects_static_manifest() {
        let mut a = args();
        a.segment_size = Some("s1048576".parse().unwrap());
        a.different = true;
        let options = a.upload_options(UploadOptions::default());

        assert_eq!(options.segment_size, 1048576);
        assert_eq!(options.manifest, ManifestKind::Static);
        assert_eq!(options.condition, UploadCondition::Different);
    }

    #[test]
    fn test_defaults_come_from_config() {
        let defaults = st_core::TransferDefaults {
            segment_size: 4096,
            ..Default::default()
        };
        let options = args().upload_options(UploadOptions::from(&defaults));
        assert_eq!(options.segment_size, 4096);
        assert_eq!(options.manifest, ManifestKind::Dynamic);
        assert_eq!(options.condition, UploadCondition::Always);
    }
}
