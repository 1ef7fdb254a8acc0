//! `xfer upload` – upload local files and wait for every one to finish.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use xfer_core::config::XferConfig;
use xfer_core::descriptor::PayloadRef;
use xfer_core::endpoint::HttpEndpoint;
use xfer_core::manager::{TransferReport, TransferResult, UploadManager};

/// Command-line values that override the config file.
#[derive(Debug, Clone, Default)]
pub struct UploadOverrides {
    pub capacity: Option<usize>,
    pub base_delay: Option<f64>,
    pub max_delay: Option<f64>,
    pub deadline: Option<f64>,
}

impl UploadOverrides {
    pub fn apply(&self, cfg: &mut XferConfig) {
        if let Some(n) = self.capacity {
            cfg.max_concurrent_transfers = n;
        }
        if let Some(s) = self.base_delay {
            cfg.backoff.base_delay_secs = s;
        }
        if let Some(s) = self.max_delay {
            cfg.backoff.max_delay_secs = s;
        }
        if let Some(s) = self.deadline {
            cfg.deadline_secs = Some(s);
        }
    }
}

/// Returns `Ok(true)` when every file was uploaded.
pub async fn run_upload(
    mut cfg: XferConfig,
    overrides: UploadOverrides,
    url: &str,
    files: &[PathBuf],
) -> Result<bool> {
    overrides.apply(&mut cfg);
    cfg.validate().context("invalid upload settings")?;

    let endpoint = Arc::new(HttpEndpoint::new(cfg.http_options()));
    let manager = Arc::new(UploadManager::from_config(&cfg, endpoint)?);

    let mut submitted = Vec::with_capacity(files.len());
    for file in files {
        let id = manager.submit(PayloadRef::File(file.clone()), url)?;
        submitted.push((id, file.as_path()));
    }
    tracing::info!(files = files.len(), url, "uploads queued");

    let ctrl_c = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupted; cancelling uploads");
                manager.cancel_all();
            }
        })
    };
    let reports = manager.wait_all().await?;
    ctrl_c.abort();

    let mut all_done = true;
    for (report, (_, file)) in reports.iter().zip(&submitted) {
        all_done &= report.result.is_done();
        println!("{}", report_line(report, file));
    }
    let s = manager.snapshot();
    tracing::info!(done = s.done, failed = s.failed, peak_in_flight = s.peak_in_flight, "uploads finished");
    Ok(all_done)
}

/// `id state attempts bytes reason file`, tab-separated.
fn report_line(report: &TransferReport, file: &Path) -> String {
    let (state, reason) = match &report.result {
        TransferResult::Done => ("done", "-".to_string()),
        TransferResult::PermanentFailure { cause, reason } => {
            ("failed", format!("{}: {}", cause, reason))
        }
    };
    format!(
        "{}\t{}\t{}\t{}\t{}\t{}",
        report.id,
        state,
        report.attempts,
        report.bytes_sent,
        reason,
        file.display()
    )
}
