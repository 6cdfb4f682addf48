//! One post, start to finish: ledger check, download, repackage, timestamp,
//! record.
//!
//! Stages run strictly in order and the first failure ends the pass. Nothing
//! is rolled back: a failed pass can leave the temporary download on disk,
//! but it never reaches the ledger, so the next run tries the post again.

use anyhow::{anyhow, bail};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ledger::DedupLedger;
use crate::metadata::VideoMetadata;
use crate::tools::Toolchain;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    LedgerCheck,
    Retrieval,
    Repackaging,
    Tagging,
    Recording,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Fetch => "fetch",
            Stage::LedgerCheck => "ledger check",
            Stage::Retrieval => "retrieval",
            Stage::Repackaging => "repackaging",
            Stage::Tagging => "tagging",
            Stage::Recording => "recording",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyDownloaded,
}

/// Outcome of one pipeline pass.
#[derive(Debug)]
pub enum ArchiveResult {
    Archived(PathBuf),
    Skipped(SkipReason),
    Failed { stage: Stage, cause: anyhow::Error },
}

impl ArchiveResult {
    pub fn failed(stage: Stage, cause: impl Into<anyhow::Error>) -> Self {
        ArchiveResult::Failed {
            stage,
            cause: cause.into(),
        }
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            ArchiveResult::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

struct StageFailure {
    stage: Stage,
    cause: anyhow::Error,
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T, E: Into<anyhow::Error>> AtStage<T> for Result<T, E> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|err| StageFailure {
            stage,
            cause: err.into(),
        })
    }
}

pub struct Pipeline {
    ledger: DedupLedger,
    tools: Toolchain,
}

impl Pipeline {
    pub fn new(ledger: DedupLedger, tools: Toolchain) -> Self {
        Self { ledger, tools }
    }

    pub fn ledger(&self) -> &DedupLedger {
        &self.ledger
    }

    pub fn process(&self, meta: &VideoMetadata) -> ArchiveResult {
        info!(
            post_id = %meta.id,
            author = %meta.author,
            post_date = %meta.post_date(),
            "video"
        );
        match self.run(meta) {
            Ok(Some(path)) => {
                info!(post_id = %meta.id, path = %path.display(), "archived");
                ArchiveResult::Archived(path)
            }
            Ok(None) => {
                info!(post_id = %meta.id, "already downloaded");
                ArchiveResult::Skipped(SkipReason::AlreadyDownloaded)
            }
            Err(StageFailure { stage, cause }) => {
                warn!(post_id = %meta.id, %stage, error = %format!("{cause:#}"), "pipeline failed");
                ArchiveResult::Failed { stage, cause }
            }
        }
    }

    /// `Ok(None)` means the ledger already had the post.
    fn run(&self, meta: &VideoMetadata) -> Result<Option<PathBuf>, StageFailure> {
        if self
            .ledger
            .contains(&meta.author, &meta.id)
            .at(Stage::LedgerCheck)?
        {
            return Ok(None);
        }

        let dir = self
            .ledger
            .author_dir(&meta.author)
            .at(Stage::Retrieval)?;
        fs::create_dir_all(&dir).at(Stage::Retrieval)?;

        let temp_path = dir.join(meta.temp_file_name());
        info!(caption = %meta.caption, file = %meta.temp_file_name(), "downloading");
        self.tools
            .retriever
            .retrieve(&meta.hd_stream_url, &temp_path)
            .at(Stage::Retrieval)?;
        if !temp_path.exists() {
            return Err(anyhow!(
                "retrieval reported success but {} is missing",
                temp_path.display()
            ))
            .at(Stage::Retrieval);
        }

        let final_path = dir.join(meta.canonical_file_name());
        info!(file = %meta.canonical_file_name(), "repackaging");
        self.repackage(meta, &temp_path, &final_path)
            .at(Stage::Repackaging)?;

        info!(file = %meta.canonical_file_name(), "setting modify date");
        self.tools
            .timestamper
            .set_timestamp(&final_path, meta.created_at)
            .at(Stage::Tagging)?;

        self.ledger
            .append(&meta.author, &meta.id)
            .at(Stage::Recording)?;
        Ok(Some(final_path))
    }

    /// Produces `final_path` from `temp_path`, then drops the temporary file.
    /// An existing `final_path` is kept as-is.
    fn repackage(
        &self,
        meta: &VideoMetadata,
        temp_path: &Path,
        final_path: &Path,
    ) -> anyhow::Result<()> {
        if final_path.exists() {
            warn!(file = %final_path.display(), "final file already exists, not overwriting");
        } else {
            self.tools
                .repackager
                .repackage(temp_path, meta, final_path)?;
            if !final_path.exists() {
                bail!(
                    "repackaging reported success but {} is missing",
                    final_path.display()
                );
            }
        }

        if let Err(err) = fs::remove_file(temp_path) {
            warn!(file = %temp_path.display(), error = %err, "could not remove temporary file");
        }
        Ok(())
    }
}
