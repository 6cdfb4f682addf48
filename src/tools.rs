//! External programs the pipeline shells out to.
//!
//! Each tool sits behind a narrow trait so the pipeline can be driven by
//! fakes in tests. The real implementations run the process to completion,
//! capture stderr, and turn a non-zero exit into a [`ToolError`].

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::ToolPaths;
use crate::error::ToolError;
use crate::metadata::{VideoMetadata, local_file_timestamp};

/// Downloads a raw stream to `dest`.
pub trait Retriever {
    fn retrieve(&self, stream_url: &str, dest: &Path) -> Result<(), ToolError>;
}

/// Copies `src`'s streams into `dest` with provenance tags, never overwriting.
pub trait Repackager {
    fn repackage(&self, src: &Path, meta: &VideoMetadata, dest: &Path) -> Result<(), ToolError>;
}

/// Sets a file's modification time.
pub trait TimestampSetter {
    fn set_timestamp(&self, path: &Path, instant: DateTime<Utc>) -> Result<(), ToolError>;
}

/// The three collaborators a pipeline pass needs.
pub struct Toolchain {
    pub retriever: Box<dyn Retriever>,
    pub repackager: Box<dyn Repackager>,
    pub timestamper: Box<dyn TimestampSetter>,
}

impl Toolchain {
    /// `yt-dlp` + `ffmpeg` + `exiftool` at the configured locations.
    pub fn system(paths: &ToolPaths) -> Self {
        Self {
            retriever: Box::new(YtDlp::new(&paths.yt_dlp)),
            repackager: Box::new(Ffmpeg::new(&paths.ffmpeg)),
            timestamper: Box::new(Exiftool::new(&paths.exiftool)),
        }
    }
}

pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Retriever for YtDlp {
    fn retrieve(&self, stream_url: &str, dest: &Path) -> Result<(), ToolError> {
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let file_name = dest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut command = Command::new(&self.program);
        command
            .arg("--quiet")
            .arg("--ignore-config")
            .arg("-P")
            .arg(dir)
            .arg("-o")
            .arg(file_name)
            .arg(stream_url);
        run_tool(command, "yt-dlp")
    }
}

pub struct Ffmpeg {
    program: PathBuf,
}

impl Ffmpeg {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Repackager for Ffmpeg {
    fn repackage(&self, src: &Path, meta: &VideoMetadata, dest: &Path) -> Result<(), ToolError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(src)
            .arg("-c")
            .arg("copy")
            .arg("-movflags")
            .arg("use_metadata_tags")
            .arg("-metadata")
            .arg(format!("url={}", meta.post_url))
            .arg("-metadata")
            .arg(format!("title={}", meta.caption))
            .arg("-n")
            .arg(dest);
        run_tool(command, "ffmpeg")
    }
}

pub struct Exiftool {
    program: PathBuf,
}

impl Exiftool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl TimestampSetter for Exiftool {
    fn set_timestamp(&self, path: &Path, instant: DateTime<Utc>) -> Result<(), ToolError> {
        let mut command = Command::new(&self.program);
        command
            .arg("-q")
            .arg("-overwrite_original")
            .arg(path)
            .arg(format!("-FileModifyDate={}", local_file_timestamp(instant)));
        run_tool(command, "exiftool")
    }
}

/// Runs `command` to completion. Stdout is discarded; stderr is kept for the
/// error report.
fn run_tool(mut command: Command, tool: &str) -> Result<(), ToolError> {
    let output = command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ToolError::Spawn {
            tool: tool.to_string(),
            source,
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ToolError::Exit {
            tool: tool.to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Probes every configured tool so a missing binary fails the run up front
/// instead of failing every post.
pub fn ensure_tools_available(paths: &ToolPaths) -> Result<()> {
    ensure_program_available(&paths.yt_dlp, "--version")?;
    ensure_program_available(&paths.ffmpeg, "-version")?;
    ensure_program_available(&paths.exiftool, "-ver")?;
    Ok(())
}

/// Runs `<program> <version_flag>` and fails loudly when it is missing or
/// broken.
fn ensure_program_available(program: &Path, version_flag: &str) -> Result<()> {
    let status = Command::new(program)
        .arg(version_flag)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();

    match status {
        Ok(status) if status.success() => Ok(()),
        Ok(_) => bail!(
            "{} is installed but returned a failure status",
            program.display()
        ),
        Err(err) => bail!(
            "{} is not installed or not in PATH: {}",
            program.display(),
            err
        ),
    }
}
