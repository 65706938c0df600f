//! Runtime adapters: config file, filesystem, HTTP validators, webhook sink,
//! pipeline reprocessing and the JSONL audit trail.

pub mod audit;
pub mod client;
pub mod config;
pub mod json_repair;
pub mod reprocess;
pub mod sink;
pub mod source;
pub mod util;

pub use audit::AuditLog;
pub use client::HttpValidator;
pub use config::Config;
pub use reprocess::CommandReprocessor;
pub use sink::{RecordingSink, WebhookSink};
pub use source::FsSourceAccessor;
