//! CLI command handlers, one file per command.

mod config;
mod upload;

pub use config::run_config;
pub use upload::{run_upload, UploadOverrides};
