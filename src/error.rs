//! Error taxonomy shared by the metadata fetcher and the external tool
//! wrappers.

use thiserror::Error;

/// Failures surfaced while talking to the metadata service.
///
/// Throttling is deliberately absent: a rate-limited response is a normal
/// [`crate::service::Lookup::RateLimited`] outcome that the fetcher retries.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("still rate limited after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("interrupted")]
    Interrupted,
}

impl From<ureq::Error> for FetchError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                FetchError::Transport(format!("HTTP {status}: {}", body.trim()))
            }
            ureq::Error::Transport(transport) => FetchError::Transport(transport.to_string()),
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Malformed(err.to_string())
    }
}

/// Result of an external process that did not finish cleanly.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} could not be started: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {}: {stderr}", exit_label(.code))]
    Exit {
        tool: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}
