//! Partial-download fallback for remote inputs.
//!
//! When piping a remote resource straight into the transcoder fails, the
//! fallback probes the resource, estimates how many leading bytes hold the
//! container header plus one second of payload, downloads that prefix into a
//! temporary file and hands the file back for a local retry.

use std::path::{Path, PathBuf};

use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::fs::File;
use tracing::{debug, info, warn};
use url::Url;

use crate::download::download_prefix;
use crate::error::{MediaError, MediaResult};
use crate::probe::{MediaMetadata, MediaProber};

/// Estimate the bytes needed to decode the first frame.
///
/// Returns `None` unless bit rate, size and duration are all known and the
/// estimate is positive.
pub fn estimate_cutoff(meta: &MediaMetadata) -> Option<u64> {
    let (bit_rate, size, duration) = match (meta.bit_rate, meta.size, meta.duration) {
        (Some(b), Some(s), Some(d)) => (b as f64, s as f64, d),
        _ => return None,
    };

    let byte_rate = bit_rate / 8.0;
    let overhead = size - byte_rate * duration;
    let cutoff = (overhead + byte_rate).ceil();

    (cutoff.is_finite() && cutoff >= 1.0).then(|| cutoff as u64)
}

/// A downloaded prefix of a remote resource.
///
/// The temporary file is removed when the plan is dropped.
#[derive(Debug)]
pub struct FallbackPlan {
    byte_limit: u64,
    temp_file: NamedTempFile,
}

impl FallbackPlan {
    /// Bytes requested for the prefix.
    pub fn byte_limit(&self) -> u64 {
        self.byte_limit
    }

    /// Location of the downloaded prefix.
    pub fn path(&self) -> &Path {
        self.temp_file.path()
    }

    /// Remove the temporary file now, logging rather than failing on error.
    pub fn cleanup(self) {
        let path = self.temp_file.path().to_path_buf();
        if let Err(e) = self.temp_file.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove fallback temp file");
        }
    }
}

/// Prepares [`FallbackPlan`]s.
pub struct FallbackFetcher<'a> {
    client: &'a Client,
    prober: &'a dyn MediaProber,
    default_byte_limit: u64,
    temp_dir: Option<PathBuf>,
}

impl<'a> FallbackFetcher<'a> {
    pub fn new(client: &'a Client, prober: &'a dyn MediaProber, default_byte_limit: u64) -> Self {
        Self {
            client,
            prober,
            default_byte_limit,
            temp_dir: None,
        }
    }

    /// Create temp files in `dir` instead of the system temp directory.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Probe `url`, pick a byte limit and download that prefix to a temp file.
    ///
    /// Any probe or download failure is reported as
    /// [`MediaError::FallbackExhausted`]; the temp file never outlives a failure.
    pub async fn prepare(&self, url: &Url) -> MediaResult<FallbackPlan> {
        self.try_prepare(url)
            .await
            .map_err(|e| MediaError::fallback_exhausted(url, e))
    }

    async fn try_prepare(&self, url: &Url) -> MediaResult<FallbackPlan> {
        let meta = self.prober.probe(url.as_str()).await?;
        let byte_limit = match estimate_cutoff(&meta) {
            Some(cutoff) => cutoff,
            None => {
                debug!(url = %url, ?meta, "Incomplete metadata, using default byte limit");
                self.default_byte_limit
            }
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("vthumb-");
        let temp_file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let mut dest = File::from_std(temp_file.reopen()?);
        download_prefix(self.client, url, byte_limit, &mut dest).await?;

        info!(url = %url, byte_limit, path = %temp_file.path().display(), "Prepared fallback input");

        Ok(FallbackPlan {
            byte_limit,
            temp_file,
        })
    }
}
