//! Container metadata probing.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Container-level metadata used to size a partial download.
///
/// Every field is optional: live streams and some containers omit them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaMetadata {
    /// Bitrate in bits/second
    pub bit_rate: Option<u64>,
    /// Total size in bytes
    pub size: Option<u64>,
    /// Duration in seconds
    pub duration: Option<f64>,
}

/// Probes a media resource for container metadata.
#[async_trait]
pub trait MediaProber: Send + Sync {
    /// Probe `source`, a URL or path the prober can open directly.
    async fn probe(&self, source: &str) -> MediaResult<MediaMetadata>;
}

/// FFprobe JSON output format.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

impl From<FfprobeFormat> for MediaMetadata {
    fn from(format: FfprobeFormat) -> Self {
        Self {
            bit_rate: format.bit_rate.and_then(|b| b.parse().ok()),
            size: format.size.and_then(|s| s.parse().ok()),
            duration: format
                .duration
                .and_then(|d| d.parse::<f64>().ok())
                .filter(|d| d.is_finite() && *d > 0.0),
        }
    }
}

/// [`MediaProber`] backed by the `ffprobe` executable.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    program: PathBuf,
}

impl FfprobeProber {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, source: &str) -> MediaResult<MediaMetadata> {
        let program = which::which(&self.program).map_err(|_| {
            MediaError::probe_failed(
                source,
                format!("{} not found", self.program.display()),
                None,
            )
        })?;

        debug!(source, "Probing remote media");

        let output = Command::new(program)
            .args(["-v", "error", "-print_format", "json", "-show_format"])
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(MediaError::probe_failed(
                source,
                "FFprobe failed",
                Some(String::from_utf8_lossy(&output.stderr).to_string()),
            ));
        }

        parse_probe_output(&output.stdout)
    }
}

fn parse_probe_output(stdout: &[u8]) -> MediaResult<MediaMetadata> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;
    Ok(probe.format.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_complete_format() {
        let json = br#"{
            "format": {
                "filename": "http://example.com/bunny.webm",
                "format_name": "matroska,webm",
                "duration": "10.000000",
                "size": "1000000",
                "bit_rate": "800000"
            }
        }"#;

        let meta = parse_probe_output(json).unwrap();
        assert_eq!(meta.bit_rate, Some(800_000));
        assert_eq!(meta.size, Some(1_000_000));
        assert!((meta.duration.unwrap() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_incomplete_format() {
        let json = br#"{"format": {"duration": "N/A", "bit_rate": "128000"}}"#;

        let meta = parse_probe_output(json).unwrap();
        assert_eq!(
            meta,
            MediaMetadata {
                bit_rate: Some(128_000),
                size: None,
                duration: None,
            }
        );
    }

    #[test]
    fn test_parse_garbage_is_json_error() {
        assert!(matches!(
            parse_probe_output(b"not json"),
            Err(MediaError::JsonParse(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_prober() {
        let prober = FfprobeProber::new("/nonexistent/bin/ffprobe");
        let err = prober.probe("http://example.com/a.webm").await.unwrap_err();
        assert!(matches!(err, MediaError::ProbeFailed { .. }));
    }
}
