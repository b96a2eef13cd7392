//! Output handling
//!
//! Human-readable output goes to stdout with optional colors; `--json`
//! switches every command to machine-readable output.

mod formatter;
mod progress;

pub use formatter::Formatter;
pub use progress::Progress;

/// Output settings taken from the global flags
#[derive(Debug, Clone, Default)]
pub struct OutputConfig {
    pub json: bool,
    pub no_color: bool,
    pub quiet: bool,
}
