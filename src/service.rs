//! Client for the RapidAPI "tiktok-video-no-watermark2" metadata service.
//!
//! The service answers every query with a JSON envelope `{ code, msg, data }`.
//! `code == -1` means the caller is being throttled; anything else is treated
//! as an answer and decoded. Each request carries a freshly randomized
//! `User-Agent` so consecutive calls do not share a fingerprint.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Deserialize;
use serde_json::Value;

use crate::config::ApiSettings;
use crate::error::FetchError;
use crate::metadata::VideoMetadata;

/// Envelope `code` the service uses to signal throttling.
pub const RATE_LIMIT_CODE: i64 = -1;

const VIDEO_LOOKUP_PATH: &str = "/";
const POST_LISTING_PATH: &str = "/user/posts";

/// Outcome of one request against the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Ready(T),
    RateLimited,
}

/// The metadata service as seen by the fetcher and the pagination walker.
/// One call is one request; retrying is the caller's business.
pub trait MetadataService {
    fn lookup_video(&self, reference: &str) -> Result<Lookup<VideoMetadata>, FetchError>;

    /// Returns the post ids of the first page (cursor 0) of `account`'s posts.
    fn list_posts(&self, account: &str, count: u32) -> Result<Lookup<Vec<String>>, FetchError>;
}

/// Blocking HTTP implementation backed by `ureq`.
pub struct RapidApiService {
    agent: ureq::Agent,
    settings: ApiSettings,
    base_url: String,
}

impl RapidApiService {
    pub fn new(settings: ApiSettings) -> Self {
        let base_url = settings.base_url();
        Self::with_base_url(settings, base_url)
    }

    fn with_base_url(settings: ApiSettings, base_url: String) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = settings.timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            agent: builder.build(),
            settings,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Lookup<String>, FetchError> {
        let url = format!("{}{}", self.base_url, path);
        let user_agent = random_user_agent(&mut rand::rng());
        let mut request = self
            .agent
            .get(&url)
            .set("User-Agent", &user_agent)
            .set("X-RapidAPI-Key", &self.settings.key)
            .set("X-RapidAPI-Host", &self.settings.host);
        for (key, value) in query {
            request = request.query(key, value);
        }

        match request.call() {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|err| FetchError::Transport(err.to_string()))?;
                Ok(Lookup::Ready(body))
            }
            Err(ureq::Error::Status(429, _)) => Ok(Lookup::RateLimited),
            Err(err) => Err(err.into()),
        }
    }
}

impl MetadataService for RapidApiService {
    fn lookup_video(&self, reference: &str) -> Result<Lookup<VideoMetadata>, FetchError> {
        let query = [("url", reference.to_string()), ("hd", "1".to_string())];
        match self.get(VIDEO_LOOKUP_PATH, &query)? {
            Lookup::Ready(body) => decode_video_lookup(&body),
            Lookup::RateLimited => Ok(Lookup::RateLimited),
        }
    }

    fn list_posts(&self, account: &str, count: u32) -> Result<Lookup<Vec<String>>, FetchError> {
        let query = [
            ("url", account.to_string()),
            ("count", count.to_string()),
            ("cursor", "0".to_string()),
            ("web", "1".to_string()),
            ("unique_id", account.to_string()),
        ];
        match self.get(POST_LISTING_PATH, &query)? {
            Lookup::Ready(body) => decode_listing(&body),
            Lookup::RateLimited => Ok(Lookup::RateLimited),
        }
    }
}

/// Post ids show up both as JSON strings and as bare numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PostId {
    Text(String),
    Number(u64),
}

impl PostId {
    fn into_string(self) -> String {
        match self {
            PostId::Text(value) => value,
            PostId::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    code: Option<i64>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl Envelope {
    fn parse(body: &str) -> Result<Self, FetchError> {
        Ok(serde_json::from_str(body)?)
    }

    fn is_rate_limited(&self) -> bool {
        self.code == Some(RATE_LIMIT_CODE)
    }

    fn into_data(self) -> Result<Value, FetchError> {
        match self.data {
            Some(data) if !data.is_null() => Ok(data),
            _ => Err(FetchError::Malformed(format!(
                "response carries no data (code {:?}, msg {:?})",
                self.code,
                self.msg.unwrap_or_default()
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: PostId,
    #[serde(default)]
    title: Option<String>,
    hdplay: String,
    author: AuthorData,
    create_time: i64,
}

#[derive(Debug, Deserialize)]
struct AuthorData {
    unique_id: String,
}

#[derive(Debug, Deserialize)]
struct ListingData {
    videos: Vec<ListedVideo>,
}

#[derive(Debug, Deserialize)]
struct ListedVideo {
    video_id: PostId,
}

/// Decodes the single-video lookup response.
pub fn decode_video_lookup(body: &str) -> Result<Lookup<VideoMetadata>, FetchError> {
    let envelope = Envelope::parse(body)?;
    if envelope.is_rate_limited() {
        return Ok(Lookup::RateLimited);
    }
    let post: PostData = serde_json::from_value(envelope.into_data()?)?;
    let created_at = DateTime::<Utc>::from_timestamp(post.create_time, 0).ok_or_else(|| {
        FetchError::Malformed(format!("create_time {} out of range", post.create_time))
    })?;
    let id = post.id.into_string();
    if !is_safe_post_id(&id) {
        return Err(FetchError::Malformed(format!("refusing unsafe post id {id:?}")));
    }
    Ok(Lookup::Ready(VideoMetadata::new(
        id,
        post.title.unwrap_or_default(),
        post.author.unique_id,
        created_at,
        post.hdplay,
    )))
}

/// Post ids become file names, so they must stay a single path component.
fn is_safe_post_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\', '\0'])
}

/// Decodes the account listing response into post ids, in service order.
pub fn decode_listing(body: &str) -> Result<Lookup<Vec<String>>, FetchError> {
    let envelope = Envelope::parse(body)?;
    if envelope.is_rate_limited() {
        return Ok(Lookup::RateLimited);
    }
    let listing: ListingData = serde_json::from_value(envelope.into_data()?)?;
    Ok(Lookup::Ready(
        listing
            .videos
            .into_iter()
            .map(|video| video.video_id.into_string())
            .collect(),
    ))
}

/// Builds a plausible desktop Firefox or Chrome user agent on Windows or
/// macOS with a randomized browser version.
pub fn random_user_agent<R: Rng>(rng: &mut R) -> String {
    let windows = rng.random_bool(0.5);
    if rng.random_bool(0.5) {
        let version = rng.random_range(115..=133);
        let platform = if windows {
            "Windows NT 10.0; Win64; x64"
        } else {
            "Macintosh; Intel Mac OS X 10.15"
        };
        format!("Mozilla/5.0 ({platform}; rv:{version}.0) Gecko/20100101 Firefox/{version}.0")
    } else {
        let version = rng.random_range(118..=131);
        let platform = if windows {
            "Windows NT 10.0; Win64; x64"
        } else {
            "Macintosh; Intel Mac OS X 10_15_7"
        };
        format!(
            "Mozilla/5.0 ({platform}) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/{version}.0.0.0 Safari/537.36"
        )
    }
}
