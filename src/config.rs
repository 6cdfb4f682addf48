#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow, bail};
use std::{
    collections::HashMap,
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::fetcher::RetryPolicy;

pub const DEFAULT_ENV_PATH: &str = ".tiktok-dl.env";
pub const DEFAULT_BASE_DIR: &str = "~/Tiktok";
pub const DEFAULT_PAGE_SIZE: u32 = 33;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 20;
pub const DEFAULT_API_HOST: &str = "tiktok-video-no-watermark2.p.rapidapi.com";

/// Everything the archiver needs, resolved once at startup and handed to each
/// component by reference.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub base_dir: PathBuf,
    pub page_size: u32,
    pub batch_file: Option<PathBuf>,
    pub api: ApiSettings,
    pub retry: RetryPolicy,
    pub tools: ToolPaths,
    pub fail_fast: bool,
}

#[derive(Clone)]
pub struct ApiSettings {
    pub key: String,
    pub host: String,
    /// `None` leaves requests without a deadline.
    pub timeout: Option<Duration>,
}

impl ApiSettings {
    pub fn base_url(&self) -> String {
        format!("https://{}", self.host)
    }
}

impl fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSettings")
            .field("key", &"<redacted>")
            .field("host", &self.host)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Program names (or absolute paths) of the external tools.
#[derive(Debug, Clone)]
pub struct ToolPaths {
    pub yt_dlp: PathBuf,
    pub ffmpeg: PathBuf,
    pub exiftool: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            yt_dlp: PathBuf::from("yt-dlp"),
            ffmpeg: PathBuf::from("ffmpeg"),
            exiftool: PathBuf::from("exiftool"),
        }
    }
}

/// Values supplied on the command line. They win over the environment and
/// the env file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_dir: Option<PathBuf>,
    pub page_size: Option<u32>,
    pub batch_file: Option<PathBuf>,
    pub max_attempts: Option<u32>,
    pub max_backoff_secs: Option<u64>,
    pub fail_fast: bool,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_config(overrides: ConfigOverrides) -> Result<ArchiveConfig> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_config_with_overrides(&file_vars, env_var_string, dirs::home_dir(), overrides)
}

#[cfg(test)]
fn build_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<ArchiveConfig> {
    build_config_with_overrides(
        file_vars,
        env_lookup,
        Some(PathBuf::from("/home/tester")),
        ConfigOverrides::default(),
    )
}

fn build_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    home: Option<PathBuf>,
    overrides: ConfigOverrides,
) -> Result<ArchiveConfig> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let key = lookup("TT_RAPIDAPI_KEY").ok_or_else(|| anyhow!("TT_RAPIDAPI_KEY not set"))?;
    let host = lookup("TT_RAPIDAPI_HOST").unwrap_or_else(|| DEFAULT_API_HOST.to_string());
    let timeout = lookup("TIKTOK_DL_HTTP_TIMEOUT_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    let base_dir = match overrides.base_dir {
        Some(path) => expand_home(&path.to_string_lossy(), home.as_deref()),
        None => {
            let raw = lookup("TIKTOK_DL_DIR").unwrap_or_else(|| DEFAULT_BASE_DIR.to_string());
            expand_home(&raw, home.as_deref())
        }
    };

    let page_size = match overrides.page_size {
        Some(0) => bail!("page size must be at least 1"),
        Some(value) => value,
        None => lookup("TIKTOK_DL_COUNT")
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE),
    };

    let max_attempts = overrides
        .max_attempts
        .or_else(|| {
            lookup("TIKTOK_DL_MAX_ATTEMPTS").and_then(|value| value.parse::<u32>().ok())
        })
        .unwrap_or(DEFAULT_MAX_ATTEMPTS);
    let max_backoff = overrides
        .max_backoff_secs
        .or_else(|| {
            lookup("TIKTOK_DL_MAX_BACKOFF_SECS").and_then(|value| value.parse::<u64>().ok())
        })
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);
    let retry = RetryPolicy {
        max_attempts: (max_attempts > 0).then_some(max_attempts),
        max_total_backoff: max_backoff,
    };

    let defaults = ToolPaths::default();
    let tools = ToolPaths {
        yt_dlp: lookup("TIKTOK_DL_YT_DLP")
            .map(PathBuf::from)
            .unwrap_or(defaults.yt_dlp),
        ffmpeg: lookup("TIKTOK_DL_FFMPEG")
            .map(PathBuf::from)
            .unwrap_or(defaults.ffmpeg),
        exiftool: lookup("TIKTOK_DL_EXIFTOOL")
            .map(PathBuf::from)
            .unwrap_or(defaults.exiftool),
    };

    Ok(ArchiveConfig {
        base_dir,
        page_size,
        batch_file: overrides.batch_file,
        api: ApiSettings { key, host, timeout },
        retry,
        tools,
        fail_fast: overrides.fail_fast,
    })
}

/// Expands a leading `~` against the user's home directory. Paths are left
/// alone when no home directory is known.
fn expand_home(raw: &str, home: Option<&Path>) -> PathBuf {
    match (raw, home) {
        ("~", Some(home)) => home.to_path_buf(),
        (_, Some(home)) if raw.starts_with("~/") => home.join(&raw[2..]),
        _ => PathBuf::from(raw),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn config_from(contents: &str) -> ArchiveConfig {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_config(&vars, |_| None).unwrap()
    }

    #[test]
    fn defaults_apply_when_only_key_is_set() {
        let config = config_from("TT_RAPIDAPI_KEY=\"secret\"\n");
        assert_eq!(config.api.key, "secret");
        assert_eq!(config.api.host, DEFAULT_API_HOST);
        assert_eq!(config.api.base_url(), format!("https://{DEFAULT_API_HOST}"));
        assert!(config.api.timeout.is_none());
        assert_eq!(config.base_dir, PathBuf::from("/home/tester/Tiktok"));
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.retry.max_attempts, Some(DEFAULT_MAX_ATTEMPTS));
        assert!(config.retry.max_total_backoff.is_none());
        assert_eq!(config.tools.yt_dlp, PathBuf::from("yt-dlp"));
        assert!(!config.fail_fast);
    }

    #[test]
    fn missing_key_is_an_error() {
        let vars = read_env_file(make_config("TIKTOK_DL_DIR=/x\n").path()).unwrap();
        let err = build_config(&vars, |_| None).unwrap_err();
        assert!(err.to_string().contains("TT_RAPIDAPI_KEY"));
    }

    #[test]
    fn env_wins_over_file() {
        let vars = read_env_file(
            make_config("TT_RAPIDAPI_KEY=\"file\"\nTIKTOK_DL_DIR=\"/file\"\n").path(),
        )
        .unwrap();
        let config = build_config(&vars, |key| {
            if key == "TIKTOK_DL_DIR" {
                Some("/env".to_string())
            } else {
                None
            }
        })
        .unwrap();
        assert_eq!(config.base_dir, PathBuf::from("/env"));
        assert_eq!(config.api.key, "file");
    }

    #[test]
    fn overrides_win_over_env_and_file() {
        let mut vars = HashMap::new();
        vars.insert("TT_RAPIDAPI_KEY".to_string(), "k".to_string());
        vars.insert("TIKTOK_DL_COUNT".to_string(), "10".to_string());
        vars.insert("TIKTOK_DL_MAX_ATTEMPTS".to_string(), "3".to_string());

        let overrides = ConfigOverrides {
            base_dir: Some(PathBuf::from("~/clips")),
            page_size: Some(5),
            batch_file: Some(PathBuf::from("urls.txt")),
            max_attempts: Some(0),
            max_backoff_secs: Some(120),
            fail_fast: true,
            env_path: None,
        };

        let config = build_config_with_overrides(
            &vars,
            |key| (key == "TIKTOK_DL_COUNT").then(|| "7".to_string()),
            Some(PathBuf::from("/home/u")),
            overrides,
        )
        .unwrap();

        assert_eq!(config.base_dir, PathBuf::from("/home/u/clips"));
        assert_eq!(config.page_size, 5);
        assert_eq!(config.batch_file, Some(PathBuf::from("urls.txt")));
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(
            config.retry.max_total_backoff,
            Some(Duration::from_secs(120))
        );
        assert!(config.fail_fast);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let config = config_from(
            "TT_RAPIDAPI_KEY=k\nTIKTOK_DL_COUNT=lots\nTIKTOK_DL_MAX_ATTEMPTS=-1\nTIKTOK_DL_HTTP_TIMEOUT_SECS=soon\n",
        );
        assert_eq!(config.page_size, DEFAULT_PAGE_SIZE);
        assert_eq!(config.retry.max_attempts, Some(DEFAULT_MAX_ATTEMPTS));
        assert!(config.api.timeout.is_none());
    }

    #[test]
    fn zero_page_size_override_is_rejected() {
        let vars = read_env_file(make_config("TT_RAPIDAPI_KEY=k\n").path()).unwrap();
        let err = build_config_with_overrides(
            &vars,
            |_| None,
            None,
            ConfigOverrides {
                page_size: Some(0),
                ..ConfigOverrides::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("page size"));
    }

    #[test]
    fn tool_paths_and_timeout_are_configurable() {
        let config = config_from(
            "TT_RAPIDAPI_KEY=k\nTIKTOK_DL_FFMPEG=/opt/ffmpeg\nTIKTOK_DL_HTTP_TIMEOUT_SECS=30\n",
        );
        assert_eq!(config.tools.ffmpeg, PathBuf::from("/opt/ffmpeg"));
        assert_eq!(config.tools.exiftool, PathBuf::from("exiftool"));
        assert_eq!(config.api.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let config = config_from("TT_RAPIDAPI_KEY=super-secret\n");
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn expand_home_handles_tilde_forms() {
        let home = Path::new("/home/a");
        assert_eq!(expand_home("~", Some(home)), PathBuf::from("/home/a"));
        assert_eq!(expand_home("~/x/y", Some(home)), PathBuf::from("/home/a/x/y"));
        assert_eq!(expand_home("/abs", Some(home)), PathBuf::from("/abs"));
        assert_eq!(expand_home("~/x", None), PathBuf::from("~/x"));
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export TT_RAPIDAPI_KEY="abc"
            TIKTOK_DL_DIR='/clips'
            TT_RAPIDAPI_HOST =  "api.example.com"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("TT_RAPIDAPI_KEY").unwrap(), "abc");
        assert_eq!(vars.get("TIKTOK_DL_DIR").unwrap(), "/clips");
        assert_eq!(vars.get("TT_RAPIDAPI_HOST").unwrap(), "api.example.com");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
