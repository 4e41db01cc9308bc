//! Input and output endpoints.
//!
//! An endpoint is where the transcoder reads its video from or writes its
//! image to. Strings are classified into local paths or remote URLs; byte
//! streams are wrapped explicitly. Each endpoint knows the argument token the
//! transcoder sees for it.

use std::fmt;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncWrite};
use url::Url;

/// Transcoder token for reading input from stdin.
pub const PIPE_INPUT: &str = "pipe:0";
/// Transcoder tokens for writing a single JPEG frame to stdout.
pub const PIPE_OUTPUT: [&str; 3] = ["-f", "mjpeg", "pipe:1"];

/// Owned readable byte stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
/// Owned writable byte stream.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Endpoint classification used to select an execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    LocalPath,
    Stream,
    Remote,
    Null,
}

/// Where the video comes from.
pub enum InputEndpoint {
    Path(PathBuf),
    Stream(BoxedReader),
    Remote(Url),
    Null,
}

impl InputEndpoint {
    /// Wrap a readable stream. Its bytes are piped to the transcoder's stdin.
    pub fn stream(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(reader))
    }

    /// Classify a string: `http`/`https` URLs are remote, anything else is a local path.
    pub fn parse(value: &str) -> Self {
        match remote_url(value) {
            Some(url) => Self::Remote(url),
            None => Self::Path(PathBuf::from(value)),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Path(_) => EndpointKind::LocalPath,
            Self::Stream(_) => EndpointKind::Stream,
            Self::Remote(_) => EndpointKind::Remote,
            Self::Null => EndpointKind::Null,
        }
    }

    /// The token passed to the transcoder after `-i`.
    ///
    /// Streams and remote resources are both fed through stdin.
    pub fn argument_token(&self) -> String {
        match self {
            Self::Path(path) => path_token(path),
            Self::Stream(_) | Self::Remote(_) | Self::Null => PIPE_INPUT.to_string(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Debug for InputEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Remote(url) => f.debug_tuple("Remote").field(&url.as_str()).finish(),
            Self::Null => f.write_str("Null"),
        }
    }
}

impl From<&str> for InputEndpoint {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for InputEndpoint {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<PathBuf> for InputEndpoint {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for InputEndpoint {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<Url> for InputEndpoint {
    fn from(url: Url) -> Self {
        Self::Remote(url)
    }
}

impl<T: Into<InputEndpoint>> From<Option<T>> for InputEndpoint {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Where the image goes.
pub enum OutputEndpoint {
    Path(PathBuf),
    Stream(BoxedWriter),
    /// No destination: the image is handed back as a byte stream.
    Null,
}

impl OutputEndpoint {
    /// Wrap a writable stream. The transcoder's stdout is piped into it.
    pub fn stream(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        Self::Stream(Box::new(writer))
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Self::Path(_) => EndpointKind::LocalPath,
            Self::Stream(_) => EndpointKind::Stream,
            Self::Null => EndpointKind::Null,
        }
    }

    /// The trailing transcoder tokens naming the output.
    pub fn argument_tokens(&self) -> Vec<String> {
        match self {
            Self::Path(path) => vec![path_token(path)],
            Self::Stream(_) | Self::Null => PIPE_OUTPUT.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Take the caller's writer, if this endpoint is a stream.
    pub fn into_writer(self) -> Option<BoxedWriter> {
        match self {
            Self::Stream(writer) => Some(writer),
            Self::Path(_) | Self::Null => None,
        }
    }
}

impl fmt::Debug for OutputEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Null => f.write_str("Null"),
        }
    }
}

impl From<&str> for OutputEndpoint {
    fn from(value: &str) -> Self {
        Self::Path(PathBuf::from(value))
    }
}

impl From<String> for OutputEndpoint {
    fn from(value: String) -> Self {
        Self::Path(PathBuf::from(value))
    }
}

impl From<PathBuf> for OutputEndpoint {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for OutputEndpoint {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl<T: Into<OutputEndpoint>> From<Option<T>> for OutputEndpoint {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Parse `value` as a URL the fallback fetcher can download.
fn remote_url(value: &str) -> Option<Url> {
    let url = Url::parse(value).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

// The transcoder is spawned without a shell, so paths need no quoting.
fn path_token(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_input_strings() {
        assert_eq!(InputEndpoint::from("./data/bunny.webm").kind(), EndpointKind::LocalPath);
        assert_eq!(
            InputEndpoint::from("http://www.w3schools.com/html/mov_bbb.webm").kind(),
            EndpointKind::Remote
        );
        assert_eq!(
            InputEndpoint::from("https://www.w3schools.com/html/mov_bbb.webm").kind(),
            EndpointKind::Remote
        );
        assert_eq!(InputEndpoint::from("ftp://example.com/a.webm").kind(), EndpointKind::LocalPath);
        assert_eq!(InputEndpoint::from("C:\\videos\\a.webm").kind(), EndpointKind::LocalPath);
        assert_eq!(InputEndpoint::from(None::<&str>).kind(), EndpointKind::Null);
    }

    #[test]
    fn test_input_tokens() {
        let spaced = InputEndpoint::from("./data/File With A Space.webm");
        assert_eq!(spaced.argument_token(), "./data/File With A Space.webm");

        let remote = InputEndpoint::from("https://example.com/video.mp4");
        assert_eq!(remote.argument_token(), PIPE_INPUT);

        let stream = InputEndpoint::stream(std::io::Cursor::new(Vec::<u8>::new()));
        assert_eq!(stream.kind(), EndpointKind::Stream);
        assert_eq!(stream.argument_token(), PIPE_INPUT);
    }

    #[test]
    fn test_output_tokens() {
        let file = OutputEndpoint::from("./out/thumb.png");
        assert_eq!(file.argument_tokens(), vec!["./out/thumb.png".to_string()]);
        assert!(file.into_writer().is_none());

        let null = OutputEndpoint::from(None::<PathBuf>);
        assert!(null.is_null());
        assert_eq!(null.argument_tokens(), vec!["-f", "mjpeg", "pipe:1"]);

        let stream = OutputEndpoint::stream(tokio::io::sink());
        assert_eq!(stream.kind(), EndpointKind::Stream);
        assert_eq!(stream.argument_tokens(), vec!["-f", "mjpeg", "pipe:1"]);
        assert!(stream.into_writer().is_some());
    }

    #[test]
    fn test_debug_hides_streams() {
        let stream = InputEndpoint::stream(tokio::io::empty());
        assert_eq!(format!("{:?}", stream), "Stream(..)");
    }
}
