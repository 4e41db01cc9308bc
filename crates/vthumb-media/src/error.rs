//! Error types for thumbnail generation.
//!
//! Process failures render as a two-part message: a header line naming the
//! transcoder and its exit code, a `<transcoder> stderr:` line, then the
//! captured error output verbatim. Callers match on that shape.

use thiserror::Error;
use vthumb_models::SizeSpecError;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while generating a thumbnail.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error(transparent)]
    InvalidSizeSpec(#[from] SizeSpecError),

    /// The transcoder could not be started. `code` follows the POSIX shell
    /// convention: 127 when the executable is missing, 126 otherwise.
    #[error("{program} exited {code}\n{program} stderr:\n\n{source}")]
    ProcessSpawnFailure {
        program: String,
        code: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited {}\n{program} stderr:\n\n{stderr}", display_code(.code))]
    ProcessExitNonZero {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} failed to encode file\n{program} stderr:\n\n{stderr}")]
    EncodingFailure { program: String, stderr: String },

    #[error("Fetching {url} failed: {message}")]
    NetworkFetchFailure { url: String, message: String },

    #[error("Probing {source_url} failed: {message}")]
    ProbeFailed {
        source_url: String,
        message: String,
        stderr: Option<String>,
    },

    #[error("Fallback download for {url} failed: {cause}")]
    FallbackExhausted {
        url: String,
        #[source]
        cause: Box<MediaError>,
    },

    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "by signal".to_string(), |c| c.to_string())
}

impl MediaError {
    /// Create a spawn failure, choosing the shell-style exit code from the IO error.
    pub fn spawn_failed(program: impl Into<String>, source: std::io::Error) -> Self {
        let code = match source.kind() {
            std::io::ErrorKind::NotFound => 127,
            _ => 126,
        };
        Self::ProcessSpawnFailure {
            program: program.into(),
            code,
            source,
        }
    }

    /// Create a network fetch failure.
    pub fn fetch_failed(url: impl ToString, message: impl ToString) -> Self {
        Self::NetworkFetchFailure {
            url: url.to_string(),
            message: message.to_string(),
        }
    }

    /// Create a probe failure.
    pub fn probe_failed(
        source_url: impl Into<String>,
        message: impl Into<String>,
        stderr: Option<String>,
    ) -> Self {
        Self::ProbeFailed {
            source_url: source_url.into(),
            message: message.into(),
            stderr,
        }
    }

    /// Wrap a probe or download failure as the terminal fallback error.
    pub fn fallback_exhausted(url: impl ToString, cause: MediaError) -> Self {
        Self::FallbackExhausted {
            url: url.to_string(),
            cause: Box::new(cause),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Captured transcoder error output, when the failure carries one.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ProcessExitNonZero { stderr, .. } | Self::EncodingFailure { stderr, .. } => {
                Some(stderr)
            }
            Self::ProbeFailed { stderr, .. } => stderr.as_deref(),
            _ => None,
        }
    }

    /// Whether a failed direct remote transcode may be retried from a partial download.
    ///
    /// Size errors and a missing transcoder would fail the retry the same way.
    pub fn allows_fallback(&self) -> bool {
        matches!(
            self,
            Self::ProcessExitNonZero { .. }
                | Self::EncodingFailure { .. }
                | Self::NetworkFetchFailure { .. }
                | Self::Io(_)
        )
    }
}
