//! Fakes shared by the unit tests: a scripted metadata service, a sleeper
//! that records instead of sleeping, in-memory tool doubles, and the
//! executable stub scripts used to exercise the real tool wrappers.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use crate::error::{FetchError, ToolError};
use crate::fetcher::Sleeper;
use crate::interrupt::Interrupt;
use crate::metadata::VideoMetadata;
use crate::service::{Lookup, MetadataService};
use crate::tools::{Repackager, Retriever, TimestampSetter, Toolchain};

pub const SAMPLE_CREATED_AT: i64 = 1_700_000_000;

pub fn sample_metadata(id: &str, author: &str) -> VideoMetadata {
    VideoMetadata::new(
        id,
        format!("caption for {id}"),
        author,
        DateTime::<Utc>::from_timestamp(SAMPLE_CREATED_AT, 0).unwrap(),
        format!("https://cdn.example.com/{id}.mp4"),
    )
}

type LookupResult = Result<Lookup<VideoMetadata>, FetchError>;
type ListingResult = Result<Lookup<Vec<String>>, FetchError>;

#[derive(Default)]
struct ScriptedState {
    lookup_queue: VecDeque<LookupResult>,
    by_reference: HashMap<String, VideoMetadata>,
    listing_queue: VecDeque<ListingResult>,
    lookups: Vec<String>,
    listings: Vec<(String, u32)>,
}

/// Metadata service that replays queued answers. Lookups fall back to the
/// per-reference table once the queue is empty.
#[derive(Clone, Default)]
pub struct ScriptedService {
    state: Rc<RefCell<ScriptedState>>,
}

impl ScriptedService {
    pub fn push_lookup(&self, result: LookupResult) {
        self.state.borrow_mut().lookup_queue.push_back(result);
    }

    pub fn answer(&self, reference: &str, meta: VideoMetadata) {
        self.state
            .borrow_mut()
            .by_reference
            .insert(reference.to_string(), meta);
    }

    pub fn push_listing(&self, result: ListingResult) {
        self.state.borrow_mut().listing_queue.push_back(result);
    }

    pub fn lookups(&self) -> Vec<String> {
        self.state.borrow().lookups.clone()
    }

    pub fn listings(&self) -> Vec<(String, u32)> {
        self.state.borrow().listings.clone()
    }
}

impl MetadataService for ScriptedService {
    fn lookup_video(&self, reference: &str) -> LookupResult {
        let mut state = self.state.borrow_mut();
        state.lookups.push(reference.to_string());
        if let Some(result) = state.lookup_queue.pop_front() {
            return result;
        }
        match state.by_reference.get(reference) {
            Some(meta) => Ok(Lookup::Ready(meta.clone())),
            None => Err(FetchError::Malformed(format!(
                "no scripted answer for {reference}"
            ))),
        }
    }

    fn list_posts(&self, account: &str, count: u32) -> ListingResult {
        let mut state = self.state.borrow_mut();
        state.listings.push((account.to_string(), count));
        state
            .listing_queue
            .pop_front()
            .unwrap_or_else(|| Ok(Lookup::Ready(Vec::new())))
    }
}

/// Records requested delays. Optionally raises an interrupt on the first
/// sleep, simulating Ctrl+C during backoff.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    delays: Rc<RefCell<Vec<Duration>>>,
    raise_on_sleep: Option<Interrupt>,
}

impl RecordingSleeper {
    pub fn raising(interrupt: Interrupt) -> Self {
        Self {
            delays: Rc::default(),
            raise_on_sleep: Some(interrupt),
        }
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.delays.borrow_mut().push(duration);
        if let Some(interrupt) = &self.raise_on_sleep {
            interrupt.raise();
        }
    }
}

/// Which fake tool, if any, should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailAt {
    Nothing,
    Retrieve,
    RetrieveSilently,
    Repackage,
    Timestamp,
}

/// Shared log of fake tool invocations, e.g. `retrieve <dest>`.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Rc<RefCell<Vec<String>>>,
}

impl CallLog {
    pub fn push(&self, entry: String) {
        self.calls.borrow_mut().push(entry);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }
}

type TimestampHook = Rc<dyn Fn(&Path)>;

struct FakeRetriever {
    log: CallLog,
    fail: FailAt,
}

impl Retriever for FakeRetriever {
    fn retrieve(&self, stream_url: &str, dest: &Path) -> Result<(), ToolError> {
        self.log.push(format!("retrieve {}", dest.display()));
        match self.fail {
            FailAt::Retrieve => Err(ToolError::Exit {
                tool: "yt-dlp".into(),
                code: Some(1),
                stderr: "HTTP Error 403".into(),
            }),
            FailAt::RetrieveSilently => Ok(()),
            _ => {
                fs::write(dest, stream_url).unwrap();
                Ok(())
            }
        }
    }
}

struct FakeRepackager {
    log: CallLog,
    fail: FailAt,
}

impl Repackager for FakeRepackager {
    fn repackage(&self, src: &Path, meta: &VideoMetadata, dest: &Path) -> Result<(), ToolError> {
        self.log.push(format!("repackage {}", dest.display()));
        if self.fail == FailAt::Repackage {
            return Err(ToolError::Exit {
                tool: "ffmpeg".into(),
                code: Some(1),
                stderr: "Invalid data found when processing input".into(),
            });
        }
        let raw = fs::read_to_string(src).unwrap();
        fs::write(dest, format!("{raw}|{}|{}", meta.post_url, meta.caption)).unwrap();
        Ok(())
    }
}

struct FakeTimestamper {
    log: CallLog,
    fail: FailAt,
    hook: Option<TimestampHook>,
}

impl TimestampSetter for FakeTimestamper {
    fn set_timestamp(&self, path: &Path, instant: DateTime<Utc>) -> Result<(), ToolError> {
        self.log
            .push(format!("timestamp {} {}", path.display(), instant.timestamp()));
        if let Some(hook) = &self.hook {
            hook(path);
        }
        if self.fail == FailAt::Timestamp {
            return Err(ToolError::Exit {
                tool: "exiftool".into(),
                code: Some(1),
                stderr: "Error: File not found".into(),
            });
        }
        Ok(())
    }
}

/// Builds a toolchain of fakes that log into `log`.
pub fn fake_toolchain(log: &CallLog, fail: FailAt) -> Toolchain {
    fake_toolchain_with_hook(log, fail, None)
}

/// Like [`fake_toolchain`], running `hook` when the timestamp step starts.
pub fn fake_toolchain_with_hook(
    log: &CallLog,
    fail: FailAt,
    hook: Option<TimestampHook>,
) -> Toolchain {
    Toolchain {
        retriever: Box::new(FakeRetriever {
            log: log.clone(),
            fail,
        }),
        repackager: Box::new(FakeRepackager {
            log: log.clone(),
            fail,
        }),
        timestamper: Box::new(FakeTimestamper {
            log: log.clone(),
            fail,
            hook,
        }),
    }
}

/// Writes an executable bash script named `name` into `dir`.
#[cfg(unix)]
pub fn install_stub(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let script_path = dir.join(name);
    fs::write(
        &script_path,
        format!("#!/usr/bin/env bash\nset -eu\n{body}\n"),
    )?;
    let mut perms = fs::metadata(&script_path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&script_path, perms)?;
    Ok(script_path)
}
