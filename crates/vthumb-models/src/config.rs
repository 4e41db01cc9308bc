//! Per-request thumbnail configuration.
//!
//! Every optional setting resolves through the same order: the explicit
//! config value, then a named environment variable, then a built-in default.
//! Resolution happens once, at the call boundary, through an [`EnvSource`].

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default transcoder executable name.
pub const DEFAULT_TRANSCODER: &str = "ffmpeg";
/// Default prober executable name.
pub const DEFAULT_PROBER: &str = "ffprobe";
/// Default seek offset.
pub const DEFAULT_SEEK: &str = "00:00:00";
/// Bytes downloaded by the remote fallback when metadata is incomplete (5 MiB).
pub const DEFAULT_FALLBACK_BYTE_LIMIT: u64 = 5 * 1024 * 1024;

/// Environment variable overriding the transcoder path.
pub const TRANSCODER_PATH_ENV: &str = "FFMPEG_PATH";
/// Environment variable overriding the prober path.
pub const PROBER_PATH_ENV: &str = "FFPROBE_PATH";
/// Environment variable overriding the fallback byte limit.
pub const FALLBACK_BYTE_LIMIT_ENV: &str = "VTHUMB_FALLBACK_BYTE_LIMIT";

/// Source of environment values.
pub trait EnvSource {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Caller-supplied options for a single thumbnail request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    /// Transcoder executable location
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Seek offset, formatted as `hh:mm:ss[.ms]`
    #[serde(default)]
    pub seek: Option<String>,

    /// Raw transcoder arguments. Replaces the generated argument vector verbatim.
    #[serde(default)]
    pub args: Option<Vec<String>>,

    /// Prober executable location, used by the remote fallback
    #[serde(default)]
    pub probe_path: Option<PathBuf>,

    /// Bytes to download when remote metadata is incomplete
    #[serde(default)]
    pub fallback_byte_limit: Option<u64>,
}

impl ThumbnailConfig {
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_seek(mut self, seek: impl Into<String>) -> Self {
        self.seek = Some(seek.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_probe_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.probe_path = Some(path.into());
        self
    }

    pub fn with_fallback_byte_limit(mut self, limit: u64) -> Self {
        self.fallback_byte_limit = Some(limit);
        self
    }

    /// Resolve against the process environment.
    pub fn resolve(&self) -> ResolvedConfig {
        self.resolve_with(&ProcessEnv)
    }

    /// Resolve against an explicit environment source.
    pub fn resolve_with(&self, env: &impl EnvSource) -> ResolvedConfig {
        let transcoder = self
            .path
            .clone()
            .or_else(|| non_empty(env.var(TRANSCODER_PATH_ENV)).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TRANSCODER));

        let prober = self
            .probe_path
            .clone()
            .or_else(|| non_empty(env.var(PROBER_PATH_ENV)).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_PROBER));

        let fallback_byte_limit = self
            .fallback_byte_limit
            .or_else(|| non_empty(env.var(FALLBACK_BYTE_LIMIT_ENV)).and_then(|s| s.parse().ok()))
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_FALLBACK_BYTE_LIMIT);

        ResolvedConfig {
            transcoder,
            prober,
            seek: non_empty(self.seek.clone()).unwrap_or_else(|| DEFAULT_SEEK.to_string()),
            args: self.args.clone(),
            fallback_byte_limit,
        }
    }
}

/// Configuration with every default applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub transcoder: PathBuf,
    pub prober: PathBuf,
    pub seek: String,
    pub args: Option<Vec<String>>,
    pub fallback_byte_limit: u64,
}

// An empty string means "not set", for both config values and env vars.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let resolved = ThumbnailConfig::default().resolve_with(&env(&[]));

        assert_eq!(resolved.transcoder, PathBuf::from("ffmpeg"));
        assert_eq!(resolved.prober, PathBuf::from("ffprobe"));
        assert_eq!(resolved.seek, "00:00:00");
        assert_eq!(resolved.args, None);
        assert_eq!(resolved.fallback_byte_limit, DEFAULT_FALLBACK_BYTE_LIMIT);
    }

    #[test]
    fn test_env_overrides_default() {
        let resolved = ThumbnailConfig::default().resolve_with(&env(&[
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("FFPROBE_PATH", "/opt/ffmpeg/bin/ffprobe"),
            ("VTHUMB_FALLBACK_BYTE_LIMIT", "1024"),
        ]));

        assert_eq!(resolved.transcoder, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
        assert_eq!(resolved.prober, PathBuf::from("/opt/ffmpeg/bin/ffprobe"));
        assert_eq!(resolved.fallback_byte_limit, 1024);
    }

    #[test]
    fn test_config_overrides_env() {
        let config = ThumbnailConfig::default()
            .with_path("/usr/local/bin/ffmpeg")
            .with_seek("00:00:00.900")
            .with_fallback_byte_limit(2048);
        let resolved = config.resolve_with(&env(&[
            ("FFMPEG_PATH", "/opt/ffmpeg"),
            ("VTHUMB_FALLBACK_BYTE_LIMIT", "1024"),
        ]));

        assert_eq!(resolved.transcoder, PathBuf::from("/usr/local/bin/ffmpeg"));
        assert_eq!(resolved.seek, "00:00:00.900");
        assert_eq!(resolved.fallback_byte_limit, 2048);
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let config = ThumbnailConfig::default().with_seek("");
        let resolved = config.resolve_with(&env(&[
            ("FFMPEG_PATH", ""),
            ("VTHUMB_FALLBACK_BYTE_LIMIT", "not a number"),
        ]));

        assert_eq!(resolved.transcoder, PathBuf::from("ffmpeg"));
        assert_eq!(resolved.seek, DEFAULT_SEEK);
        assert_eq!(resolved.fallback_byte_limit, DEFAULT_FALLBACK_BYTE_LIMIT);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ThumbnailConfig =
            serde_json::from_str(r#"{"seek": "00:00:01", "args": ["-i", "pipe:0"]}"#).unwrap();

        assert_eq!(config.seek.as_deref(), Some("00:00:01"));
        assert_eq!(config.args, Some(vec!["-i".to_string(), "pipe:0".to_string()]));
        assert!(config.path.is_none());
    }
}
