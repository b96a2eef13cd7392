//! head command - Show object metadata
//!
//! Prints size, etag, content type, and large-object manifest details,
//! followed by every response header.

use clap::Args;
use comfy_table::{ContentArrangement, Table, presets};

use super::{GlobalOptions, connect, parse_object_path, report};
use crate::exit_code::ExitCode;
use crate::output::{Formatter, OutputConfig};
use st_core::ObjectInfo;

/// Show an object's metadata
#[derive(Args, Debug)]
pub struct HeadArgs {
    /// Object to inspect (alias/container/object)
    pub path: String,
}

/// Execute the head command
pub async fn execute(args: HeadArgs, global: &GlobalOptions, output_config: OutputConfig) -> ExitCode {
    let formatter = Formatter::new(output_config);
    let (remote, object) = match parse_object_path(&args.path, &formatter) {
        Ok(p) => p,
        Err(code) => return code,
    };
    let orchestrator = match connect(&remote.alias, global, &formatter) {
        Ok(o) => o,
        Err(code) => return code,
    };

    match orchestrator.head(&object).await {
        Ok(info) => {
            if formatter.is_json() {
                formatter.json(&info);
            } else {
                formatter.println(&render(&info, &formatter));
            }
            ExitCode::Success
        }
        Err(e) => report(&formatter, &format!("Failed to head {object}"), &e),
    }
}

fn render(info: &ObjectInfo, formatter: &Formatter) -> String {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let mut row = |key: &str, value: String| {
        table.add_row(vec![formatter.style_key(key), value]);
    };
    row("Object", formatter.style_name(&info.path));
    if let Some(size) = info.size_bytes {
        row("Size", format!("{} ({size} bytes)", formatter.style_size(size)));
    }
    if let Some(etag) = &info.etag {
        row("ETag", etag.clone());
    }
    if let Some(content_type) = &info.content_type {
        row("Content Type", content_type.clone());
    }
    if let Some(modified) = &info.last_modified {
        row("Last Modified", modified.clone());
    }
    if let Some(mtime) = info.mtime {
        row("Local Mtime", format!("{mtime:.6}"));
    }
    if let Some(kind) = info.manifest {
        row("Manifest", kind.to_string());
    }
    if let Some(prefix) = &info.manifest_prefix {
        row("Segments", prefix.clone());
    }
    for (name, value) in &info.headers {
        row(name, formatter.style_dim(value));
    }
    table.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_core::Headers;

    #[test]
    fn test_render_shows_manifest() {
        let mut headers = Headers::new();
        headers.insert("content-length".into(), "25".into());
        headers.insert("x-object-manifest".into(), "c_segments/o/1.000000/25/".into());
        let info = ObjectInfo::from_headers("c/o", headers);

        let formatter = Formatter::new(OutputConfig {
            no_color: true,
            ..Default::default()
        });
        let text = render(&info, &formatter);
        assert!(text.contains("dynamic"));
        assert!(text.contains("c_segments/o/1.000000/25/"));
        assert!(text.contains("25 bytes"));
    }
}
