//! st-core: transfer engine for the stratus object storage client
//!
//! This crate provides the core functionality for stratus, including:
//! - Configuration and alias management
//! - Path parsing and resolution
//! - The `Backend` and `Authenticator` traits the engine talks through
//! - Token caching, retry policy, and the process-wide concurrency gate
//! - Segment planning, segmented upload, and ordered segmented download
//!
//! This crate is independent of any HTTP client, so the engine can be driven
//! by an in-memory backend in tests or by a direct-to-storage-node backend.

pub mod alias;
pub mod body;
pub mod config;
pub mod download;
pub mod error;
pub mod gate;
pub mod manifest;
pub mod orchestrator;
pub mod path;
pub mod planner;
pub mod retry;
pub mod session;
pub mod token;
pub mod traits;
pub mod upload;

pub use alias::{Alias, AliasManager, RetryConfig};
pub use body::{Body, ByteStream, StreamSource};
pub use config::{Config, ConfigManager, TransferDefaults};
pub use download::{Download, FetchMode, ListingEntry, OrderedSegments, SegmentDownloader};
pub use error::{Error, ErrorKind, Result};
pub use gate::{ConcurrencyGate, Permit};
pub use manifest::{ManifestKind, ManifestRecord, SegmentDescriptor, SegmentSetting};
pub use orchestrator::{Downloaded, Orchestrator, TransferState, UploadOutcome};
pub use path::{ObjectPath, RemotePath, parse_path};
pub use planner::{Direction, Plan, Source, TransferSpec, UploadCondition, UploadOptions, plan};
pub use retry::{RetryBuilder, RetryPolicy, is_retryable_error, retry_with_backoff};
pub use session::Session;
pub use token::{AuthCacheFile, Endpoint, StaticAuthenticator, TokenCache};
pub use traits::{Authenticator, Backend, Headers, Method, ObjectInfo, Request, Response};
pub use upload::SegmentUploader;
