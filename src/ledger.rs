//! Per-author record of posts that made it all the way into the archive.
//!
//! Layout: `{base}/{author}/{author}.txt`, one post id per line, appended to
//! and never rewritten. A post is only recorded once its final file exists,
//! so "present in the ledger" means "fully archived".

use anyhow::{Context, Result, bail};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

const LEDGER_EXT: &str = "txt";

#[derive(Debug, Clone)]
pub struct DedupLedger {
    base_dir: PathBuf,
}

impl DedupLedger {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding an author's archived files and ledger.
    pub fn author_dir(&self, author: &str) -> Result<PathBuf> {
        validate_author(author)?;
        Ok(self.base_dir.join(author))
    }

    pub fn path_for(&self, author: &str) -> Result<PathBuf> {
        Ok(self
            .author_dir(author)?
            .join(format!("{author}.{LEDGER_EXT}")))
    }

    /// True when `post_id` was already archived for `author`. Creates an empty
    /// ledger on first access.
    pub fn contains(&self, author: &str, post_id: &str) -> Result<bool> {
        let path = self.path_for(author)?;
        if !path.exists() {
            create_empty(&path)?;
            return Ok(false);
        }
        Ok(load_entries(&path)?.contains(post_id))
    }

    /// Every post id recorded for `author`.
    pub fn entries(&self, author: &str) -> Result<HashSet<String>> {
        let path = self.path_for(author)?;
        if !path.exists() {
            return Ok(HashSet::new());
        }
        load_entries(&path)
    }

    /// Records `post_id` for `author`. Already-recorded ids are left alone so
    /// each id appears at most once.
    pub fn append(&self, author: &str, post_id: &str) -> Result<()> {
        let path = self.path_for(author)?;
        let existing = if path.exists() {
            fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?
        } else {
            String::new()
        };
        if existing.lines().any(|line| line.trim() == post_id) {
            debug!(author, post_id, "ledger already lists post");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening ledger {}", path.display()))?;
        // Keep one id per line even if someone hand-edited away the last newline.
        if !existing.is_empty() && !existing.ends_with('\n') {
            writeln!(file).with_context(|| format!("writing {}", path.display()))?;
        }
        writeln!(file, "{post_id}")
            .with_context(|| format!("writing ledger entry for {post_id}"))?;
        Ok(())
    }
}

fn create_empty(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("creating ledger {}", path.display()))?;
    Ok(())
}

fn load_entries(path: &Path) -> Result<HashSet<String>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut entries = HashSet::new();

    for line in reader.lines() {
        let line = line.with_context(|| format!("reading {}", path.display()))?;
        let id = line.trim();
        if !id.is_empty() {
            entries.insert(id.to_owned());
        }
    }

    Ok(entries)
}

/// Author handles become directory names; refuse anything that would escape
/// the base directory.
fn validate_author(author: &str) -> Result<()> {
    if author.is_empty()
        || author == "."
        || author == ".."
        || author.contains(['/', '\\', '\0'])
    {
        bail!("refusing unsafe author handle {author:?}");
    }
    Ok(())
}
