//! The per-post metadata the pipeline works from, plus the naming rules that
//! turn it into on-disk artifacts.
//!
//! A `VideoMetadata` only lives for one pipeline pass; nothing here is
//! persisted apart from the file names it produces.

use chrono::{DateTime, Local, TimeDelta, Utc};

/// Container used for both the temporary download and the archived file.
pub const CONTAINER_EXT: &str = "mp4";

/// Archive dates are stamped in UTC+9 regardless of where the tool runs.
const POST_DATE_UTC_OFFSET_HOURS: i64 = 9;

/// Everything the pipeline needs to know about one post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub id: String,
    pub caption: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub hd_stream_url: String,
    pub post_url: String,
}

impl VideoMetadata {
    pub fn new(
        id: impl Into<String>,
        caption: impl Into<String>,
        author: impl Into<String>,
        created_at: DateTime<Utc>,
        hd_stream_url: impl Into<String>,
    ) -> Self {
        let id = id.into();
        let author = author.into();
        let post_url = post_url(&author, &id);
        Self {
            id,
            caption: caption.into(),
            author,
            created_at,
            hd_stream_url: hd_stream_url.into(),
            post_url,
        }
    }

    /// `yymmdd` of the creation instant in UTC+9.
    pub fn post_date(&self) -> String {
        (self.created_at + TimeDelta::hours(POST_DATE_UTC_OFFSET_HOURS))
            .format("%y%m%d")
            .to_string()
    }

    /// Name of the raw download before repackaging, e.g. `7301.mp4`.
    pub fn temp_file_name(&self) -> String {
        format!("{}.{CONTAINER_EXT}", self.id)
    }

    /// Final archived name, e.g. `231115 - 7301.mp4`.
    pub fn canonical_file_name(&self) -> String {
        format!("{} - {}.{CONTAINER_EXT}", self.post_date(), self.id)
    }
}

/// `instant` as local wall-clock time, in the form exiftool expects for
/// `FileModifyDate`.
pub fn local_file_timestamp(instant: DateTime<Utc>) -> String {
    instant
        .with_timezone(&Local)
        .format("%Y:%m:%d %H:%M:%S%:z")
        .to_string()
}

/// Public web URL of a post, embedded into the archived file.
pub fn post_url(author: &str, post_id: &str) -> String {
    format!("https://www.tiktok.com/@{author}/video/{post_id}")
}
