//! Transcoder process execution.
//!
//! Three protocols share one spawn routine:
//! - **Blocking** ([`TranscoderRunner::run_blocking`]): pipe input in, pipe
//!   output out, resolve once the process is done.
//! - **Streaming** ([`TranscoderRunner::run_streaming`]): return stdout as a
//!   [`ThumbnailStream`] as soon as the process exists.
//! - **Duplex** ([`TranscoderRunner::run_duplex`]): hand the caller a single
//!   [`TranscoderDuplex`] that writes to stdin and reads from stdout.
//!
//! A process can exit before the reader has drained its stderr pipe. The
//! result is therefore composed only after every stdio pump has finished;
//! the exit status alone never resolves it.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::task::{Context, Poll};

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::endpoint::{BoxedReader, EndpointKind};
use crate::error::{MediaError, MediaResult};

/// Marker FFmpeg prints when it exits cleanly without producing a frame.
pub const NOTHING_ENCODED: &str = "nothing was encoded";

const PIPE_CHUNK_SIZE: usize = 64 * 1024;

/// How a request is executed, chosen from the shape of its endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Blocking,
    Streaming,
    Duplex,
}

impl ExecutionMode {
    /// Select the protocol for an input/output pair.
    ///
    /// A raw argument override always runs duplex, since the caller owns the
    /// argument vector and therefore both ends of the pipe.
    pub fn select(input: EndpointKind, output: EndpointKind, has_override: bool) -> MediaResult<Self> {
        if has_override {
            return Ok(Self::Duplex);
        }

        match (input, output) {
            (EndpointKind::Null, EndpointKind::Null) => Ok(Self::Duplex),
            (EndpointKind::Null, _) => Err(MediaError::InvalidEndpoint(
                "an input is required unless the output is also absent".to_string(),
            )),
            (_, EndpointKind::Null) => Ok(Self::Streaming),
            (_, _) => Ok(Self::Blocking),
        }
    }
}

/// Bytes fed into the transcoder's stdin.
pub enum StdinFeed {
    /// A caller-supplied stream.
    Reader(BoxedReader),
    /// The body of an HTTP response, read chunk by chunk.
    Http { url: Url, response: reqwest::Response },
}

impl From<BoxedReader> for StdinFeed {
    fn from(reader: BoxedReader) -> Self {
        Self::Reader(reader)
    }
}

/// Spawns the transcoder under one of the three protocols.
#[derive(Debug, Clone)]
pub struct TranscoderRunner {
    program: PathBuf,
}

impl TranscoderRunner {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }

    /// The transcoder name used in error messages.
    pub fn program(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    fn spawn(&self, args: &[String], stdin: bool, stdout: bool) -> MediaResult<Child> {
        let program = self.program();
        // Explicit paths go straight to spawn so its error tells a missing
        // file apart from one that cannot be executed.
        let resolved = if has_directory(&self.program) {
            self.program.clone()
        } else {
            which::which(&self.program)
                .map_err(|_| MediaError::spawn_failed(&program, io::Error::from(io::ErrorKind::NotFound)))?
        };

        debug!("Running transcoder: {} {}", program, args.join(" "));

        Command::new(resolved)
            .args(args)
            .stdin(if stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(if stdout { Stdio::piped() } else { Stdio::null() })
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| MediaError::spawn_failed(program, e))
    }

    /// Run to completion.
    ///
    /// `input` is piped to stdin when present; stdout is copied into `output`
    /// when present. Fails when the process exits non-zero or reports that
    /// nothing was encoded.
    pub async fn run_blocking<W>(
        &self,
        args: &[String],
        input: Option<StdinFeed>,
        output: Option<&mut W>,
    ) -> MediaResult<()>
    where
        W: AsyncWrite + Send + Unpin + ?Sized,
    {
        let mut child = self.spawn(args, input.is_some(), output.is_some())?;
        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = take_stderr(&mut child)?;

        let input_pump = async {
            match (input, stdin) {
                (Some(feed), Some(stdin)) => pump_input(feed, stdin).await,
                _ => Ok(0),
            }
        };
        let output_pump = async {
            match (stdout, output) {
                (Some(mut stdout), Some(sink)) => tokio::io::copy(&mut stdout, sink).await,
                _ => Ok(0),
            }
        };

        let (status, input_result, output_result, stderr) =
            tokio::join!(child.wait(), input_pump, output_pump, collect_stderr(stderr));

        let status = status?;
        debug!(code = ?status.code(), "Transcoder stdio closed");

        if let Err(e) = output_result {
            return Err(MediaError::Io(e));
        }

        let verdict = check_completion(&self.program(), status, stderr);
        match (&verdict, input_result) {
            (Ok(()), Err(e)) => warn!(error = %e, "Input ended with an error after the frame was written"),
            (Err(_), Err(e)) => warn!(error = %e, "Input pump failed"),
            (_, Ok(bytes)) => trace!(bytes, "Input pump finished"),
        }
        verdict
    }

    /// Spawn and return stdout without waiting for the process to exit.
    pub async fn run_streaming(&self, args: &[String], input: Option<StdinFeed>) -> MediaResult<ThumbnailStream> {
        let mut child = self.spawn(args, input.is_some(), true)?;

        let stdin_task = match (input, child.stdin.take()) {
            (Some(feed), Some(stdin)) => Some(tokio::spawn(pump_input(feed, stdin))),
            _ => None,
        };
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("transcoder stdout not captured"))?;
        let stderr_task = tokio::spawn(collect_stderr(take_stderr(&mut child)?));

        info!(program = %self.program(), "Streaming transcoder output");

        Ok(ThumbnailStream {
            program: self.program(),
            child,
            stdout,
            stdin_task,
            stderr_task,
        })
    }

    /// Spawn and expose stdin/stdout as a single bidirectional channel.
    pub fn run_duplex(&self, args: &[String]) -> MediaResult<TranscoderDuplex> {
        let mut child = self.spawn(args, true, true)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| MediaError::internal("transcoder stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("transcoder stdout not captured"))?;
        // Drained in the background so a chatty transcoder never blocks on a full pipe.
        let stderr_task = tokio::spawn(collect_stderr(take_stderr(&mut child)?));

        info!(program = %self.program(), "Opened duplex transcoder channel");

        Ok(TranscoderDuplex {
            program: self.program(),
            child,
            stdin: Some(stdin),
            stdout,
            stderr_task,
        })
    }
}

/// Live stdout of a streaming run.
///
/// Reads yield the encoded image as the transcoder produces it. The stream is
/// single-pass. Call [`finish`](Self::finish) to learn whether the run
/// succeeded; dropping the stream leaves the process to finish on its own.
pub struct ThumbnailStream {
    program: String,
    child: Child,
    stdout: ChildStdout,
    stdin_task: Option<JoinHandle<MediaResult<u64>>>,
    stderr_task: JoinHandle<String>,
}

impl ThumbnailStream {
    /// OS process id of the transcoder, if it is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Discard unread output, wait for the process and report its outcome
    /// with the same rules as the blocking protocol.
    pub async fn finish(mut self) -> MediaResult<()> {
        let discarded = tokio::io::copy(&mut self.stdout, &mut tokio::io::sink()).await?;
        if discarded > 0 {
            debug!(bytes = discarded, "Discarded unread transcoder output");
        }
        drop(self.stdout);

        let status = self.child.wait().await?;
        let stderr = join_task(self.stderr_task).await?;
        if let Some(task) = self.stdin_task {
            if let Err(e) = join_task(task).await? {
                warn!(error = %e, "Input pump failed");
            }
        }

        check_completion(&self.program, status, stderr)
    }

    /// Read the whole image, then [`finish`](Self::finish).
    pub async fn collect(mut self) -> MediaResult<Vec<u8>> {
        let mut bytes = Vec::new();
        self.stdout.read_to_end(&mut bytes).await?;
        self.finish().await?;
        Ok(bytes)
    }
}

impl AsyncRead for ThumbnailStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

/// Bidirectional channel over the transcoder's stdin and stdout.
///
/// Writes go to stdin, reads come from stdout. Shutting down the write half
/// closes stdin so the transcoder sees end of input.
pub struct TranscoderDuplex {
    program: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: ChildStdout,
    stderr_task: JoinHandle<String>,
}

impl TranscoderDuplex {
    /// OS process id of the transcoder, if it is still running.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Close stdin, discard unread output and wait for the process.
    pub async fn wait(mut self) -> MediaResult<()> {
        if let Some(mut stdin) = self.stdin.take() {
            if let Err(e) = stdin.shutdown().await {
                if e.kind() != io::ErrorKind::BrokenPipe {
                    warn!(error = %e, "Failed to close transcoder stdin");
                }
            }
        }
        tokio::io::copy(&mut self.stdout, &mut tokio::io::sink()).await?;

        let status = self.child.wait().await?;
        let stderr = join_task(self.stderr_task).await?;
        check_completion(&self.program, status, stderr)
    }
}

impl AsyncRead for TranscoderDuplex {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

impl AsyncWrite for TranscoderDuplex {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        match self.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_write(cx, buf),
            None => Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "transcoder stdin is closed"))),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.stdin.as_mut() {
            Some(stdin) => Pin::new(stdin).poll_flush(cx),
            None => Poll::Ready(Ok(())),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let result = match self.stdin.as_mut() {
            Some(stdin) => std::task::ready!(Pin::new(stdin).poll_shutdown(cx)),
            None => Ok(()),
        };
        // Dropping the handle closes the pipe.
        self.stdin = None;
        Poll::Ready(result)
    }
}

fn has_directory(program: &Path) -> bool {
    program.parent().is_some_and(|dir| !dir.as_os_str().is_empty())
}

fn take_stderr(child: &mut Child) -> MediaResult<ChildStderr> {
    child
        .stderr
        .take()
        .ok_or_else(|| MediaError::internal("transcoder stderr not captured"))
}

async fn join_task<T>(task: JoinHandle<T>) -> MediaResult<T> {
    task.await
        .map_err(|e| MediaError::internal(format!("transcoder pipe task failed: {}", e)))
}

/// Decide the outcome of a finished run from its exit status and full stderr.
fn check_completion(program: &str, status: ExitStatus, stderr: String) -> MediaResult<()> {
    if !status.success() {
        return Err(MediaError::ProcessExitNonZero {
            program: program.to_string(),
            code: status.code(),
            stderr,
        });
    }

    // Some failures exit 0 without producing a frame.
    if stderr.contains(NOTHING_ENCODED) {
        return Err(MediaError::EncodingFailure {
            program: program.to_string(),
            stderr,
        });
    }

    Ok(())
}

/// Accumulate stderr until the pipe closes.
async fn collect_stderr(stderr: ChildStderr) -> String {
    let mut reader = BufReader::new(stderr);
    let mut collected = String::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&line);
                trace!(target: "vthumb::transcoder", "{}", text.trim_end());
                collected.push_str(&text);
            }
            Err(e) => {
                warn!(error = %e, "Failed to read transcoder stderr");
                break;
            }
        }
    }

    collected
}

/// Copy `feed` into the transcoder's stdin, then close it.
///
/// The transcoder stops reading once it has its frame; a broken pipe after
/// that point ends the pump without error.
async fn pump_input(feed: StdinFeed, mut stdin: ChildStdin) -> MediaResult<u64> {
    let mut written = 0u64;

    match feed {
        StdinFeed::Reader(mut reader) => {
            let mut buf = vec![0u8; PIPE_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                if !write_chunk(&mut stdin, &buf[..n]).await? {
                    return Ok(written);
                }
                written += n as u64;
            }
        }
        StdinFeed::Http { url, mut response } => {
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| MediaError::fetch_failed(&url, e))?
            {
                if !write_chunk(&mut stdin, &chunk).await? {
                    return Ok(written);
                }
                written += chunk.len() as u64;
            }
        }
    }

    if let Err(e) = stdin.shutdown().await {
        if e.kind() != io::ErrorKind::BrokenPipe {
            return Err(e.into());
        }
    }
    Ok(written)
}

/// Returns `false` once the transcoder has closed its end of the pipe.
async fn write_chunk(stdin: &mut ChildStdin, chunk: &[u8]) -> MediaResult<bool> {
    match stdin.write_all(chunk).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::BoxedWriter;

    #[cfg(unix)]
    fn exit_status(code: i32) -> ExitStatus {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn test_mode_selection() {
        use EndpointKind::*;

        assert_eq!(ExecutionMode::select(LocalPath, LocalPath, false).unwrap(), ExecutionMode::Blocking);
        assert_eq!(ExecutionMode::select(Stream, Stream, false).unwrap(), ExecutionMode::Blocking);
        assert_eq!(ExecutionMode::select(Remote, LocalPath, false).unwrap(), ExecutionMode::Blocking);
        assert_eq!(ExecutionMode::select(LocalPath, Null, false).unwrap(), ExecutionMode::Streaming);
        assert_eq!(ExecutionMode::select(Stream, Null, false).unwrap(), ExecutionMode::Streaming);
        assert_eq!(ExecutionMode::select(Null, Null, false).unwrap(), ExecutionMode::Duplex);
        assert_eq!(ExecutionMode::select(LocalPath, LocalPath, true).unwrap(), ExecutionMode::Duplex);
        assert!(matches!(
            ExecutionMode::select(Null, LocalPath, false),
            Err(MediaError::InvalidEndpoint(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_completion_rules() {
        assert!(check_completion("ffmpeg", exit_status(0), "frame=    1 fps=0.0".to_string()).is_ok());

        let err = check_completion("ffmpeg", exit_status(1), "boom".to_string()).unwrap_err();
        assert!(matches!(err, MediaError::ProcessExitNonZero { code: Some(1), .. }));

        let err = check_completion(
            "ffmpeg",
            exit_status(0),
            "Output file is empty, nothing was encoded".to_string(),
        )
        .unwrap_err();
        assert!(matches!(err, MediaError::EncodingFailure { .. }));

        // Exit code takes precedence over the marker.
        let err = check_completion("ffmpeg", exit_status(1), NOTHING_ENCODED.to_string()).unwrap_err();
        assert!(matches!(err, MediaError::ProcessExitNonZero { .. }));
    }

    #[tokio::test]
    async fn test_missing_transcoder_is_spawn_failure() {
        let runner = TranscoderRunner::new("/nonexistent/bin/ffmpeg");
        let err = runner
            .run_blocking(&[], None, None::<&mut BoxedWriter>)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::ProcessSpawnFailure { code: 127, .. }));
        let message = err.to_string();
        let lines: Vec<&str> = message.split('\n').collect();
        assert_eq!(lines[0], "/nonexistent/bin/ffmpeg exited 127");
        assert_eq!(lines[1], "/nonexistent/bin/ffmpeg stderr:");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_blocking_pipes_stream_to_stream() {
        let runner = TranscoderRunner::new("cat");
        let input: BoxedReader = Box::new(std::io::Cursor::new(b"frame bytes".to_vec()));
        let mut output: BoxedWriter = Box::new(
            tokio_test::io::Builder::new().write(b"frame bytes").build(),
        );

        runner
            .run_blocking(&[], Some(input.into()), Some(&mut output))
            .await
            .unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_executable_transcoder_exits_126() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let program = dir.path().join("ffmpeg");
        std::fs::write(&program, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = TranscoderRunner::new(&program)
            .run_blocking(&[], None, None::<&mut BoxedWriter>)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::ProcessSpawnFailure { code: 126, .. }));
        assert!(err.to_string().starts_with(&format!("{} exited 126\n", program.display())));
    }

    #[test]
    fn test_bare_names_are_looked_up() {
        assert!(!has_directory(Path::new("ffmpeg")));
        assert!(has_directory(Path::new("./ffmpeg")));
        assert!(has_directory(Path::new("/usr/bin/ffmpeg")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_duplex_wait_after_transcoder_exited() {
        // `true` exits without reading stdin, so closing it races the exit.
        let duplex = TranscoderRunner::new("true").run_duplex(&[]).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        duplex.wait().await.unwrap();
    }
}
