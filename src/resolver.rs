//! Turns raw references into archived posts.
//!
//! A reference is classified by marker tokens only: `/video/` means a single
//! post, `@` means an account, anything else is handed to the metadata
//! service untouched as a bare post id.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::config::ArchiveConfig;
use crate::error::FetchError;
use crate::fetcher::{Fetcher, Sleeper, ThreadSleeper};
use crate::interrupt::Interrupt;
use crate::ledger::DedupLedger;
use crate::pipeline::{ArchiveResult, Pipeline, Stage};
use crate::service::{MetadataService, RapidApiService};
use crate::tools::Toolchain;
use crate::walker::list_recent;

const DIRECT_VIDEO_MARKER: &str = "/video/";
const ACCOUNT_MARKER: char = '@';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    DirectVideo,
    AccountHandle,
    OpaqueIdentifier,
}

pub fn classify(reference: &str) -> ReferenceKind {
    let reference = reference.trim();
    if reference.contains(DIRECT_VIDEO_MARKER) {
        ReferenceKind::DirectVideo
    } else if reference.contains(ACCOUNT_MARKER) {
        ReferenceKind::AccountHandle
    } else {
        ReferenceKind::OpaqueIdentifier
    }
}

/// Reads a batch file: one reference per line, blank lines and `#` comments
/// ignored.
pub fn load_references(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading batch file {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Tally of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub archived: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
}

impl RunSummary {
    fn record(&mut self, result: &ArchiveResult) {
        match result {
            ArchiveResult::Archived(_) => self.archived += 1,
            ArchiveResult::Skipped(_) => self.skipped += 1,
            ArchiveResult::Failed { .. } => self.failed += 1,
        }
    }
}

/// Drives references through fetch, ledger check and pipeline, one post at a
/// time.
pub struct Archiver<S, Z = ThreadSleeper> {
    fetcher: Fetcher<S, Z>,
    pipeline: Pipeline,
    page_size: u32,
    interrupt: Interrupt,
    fail_fast: bool,
}

impl Archiver<RapidApiService> {
    /// Wires the real metadata service and external tools from `config`.
    pub fn from_config(config: &ArchiveConfig, interrupt: Interrupt) -> Self {
        let fetcher = Fetcher::new(
            RapidApiService::new(config.api.clone()),
            ThreadSleeper::new(interrupt.clone()),
            config.retry,
            interrupt.clone(),
        );
        let pipeline = Pipeline::new(
            DedupLedger::new(config.base_dir.clone()),
            Toolchain::system(&config.tools),
        );
        Self::new(fetcher, pipeline, config.page_size, interrupt).fail_fast(config.fail_fast)
    }
}

impl<S: MetadataService, Z: Sleeper> Archiver<S, Z> {
    pub fn new(
        fetcher: Fetcher<S, Z>,
        pipeline: Pipeline,
        page_size: u32,
        interrupt: Interrupt,
    ) -> Self {
        Self {
            fetcher,
            pipeline,
            page_size,
            interrupt,
            fail_fast: false,
        }
    }

    /// With `fail_fast`, the first metadata failure ends the run with an
    /// error instead of being counted and skipped.
    pub fn fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn run(&self, references: &[String]) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for reference in references {
            if self.interrupt.is_raised() {
                summary.interrupted = true;
                break;
            }
            self.resolve(reference, &mut summary)?;
            if summary.interrupted {
                break;
            }
        }
        info!(
            archived = summary.archived,
            skipped = summary.skipped,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "run finished"
        );
        Ok(summary)
    }

    /// Processes one reference, adding its outcomes to `summary`.
    pub fn resolve(&self, reference: &str, summary: &mut RunSummary) -> Result<()> {
        let reference = reference.trim();
        match classify(reference) {
            ReferenceKind::DirectVideo | ReferenceKind::OpaqueIdentifier => {
                self.archive_one(reference, summary)
            }
            ReferenceKind::AccountHandle => self.archive_account(reference, summary),
        }
    }

    fn archive_account(&self, account: &str, summary: &mut RunSummary) -> Result<()> {
        let post_ids = match list_recent(&self.fetcher, account, self.page_size) {
            Ok(post_ids) => post_ids,
            Err(err) => return self.fetch_failed(account, err, summary),
        };
        for post_id in post_ids {
            if self.interrupt.is_raised() {
                summary.interrupted = true;
                break;
            }
            self.archive_one(&post_id, summary)?;
            if summary.interrupted {
                break;
            }
        }
        Ok(())
    }

    fn archive_one(&self, lookup_key: &str, summary: &mut RunSummary) -> Result<()> {
        let meta = match self.fetcher.fetch(lookup_key) {
            Ok(meta) => meta,
            Err(err) => return self.fetch_failed(lookup_key, err, summary),
        };
        let result = self.pipeline.process(&meta);
        summary.record(&result);
        Ok(())
    }

    fn fetch_failed(
        &self,
        reference: &str,
        err: FetchError,
        summary: &mut RunSummary,
    ) -> Result<()> {
        if matches!(err, FetchError::Interrupted) {
            summary.interrupted = true;
            return Ok(());
        }
        if self.fail_fast {
            return Err(err).with_context(|| format!("fetching metadata for {reference}"));
        }
        warn!(reference, stage = %Stage::Fetch, error = %err, "skipping reference");
        summary.record(&ArchiveResult::failed(Stage::Fetch, err));
        Ok(())
    }
}
