//! Thumbnail generation.
//!
//! [`ThumbnailGenerator::generate`] turns an input, an output and a size
//! string into one transcoder run. The execution protocol follows from the
//! endpoints:
//!
//! | input      | output     | result                         |
//! |------------|------------|--------------------------------|
//! | any        | path/stream| [`ThumbnailOutput::Completed`] |
//! | any        | none       | [`ThumbnailOutput::Stream`]    |
//! | none       | none       | [`ThumbnailOutput::Duplex`]    |
//!
//! A raw argument override in the config always yields a duplex channel.

use std::sync::Arc;

use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use url::Url;
use vthumb_models::{ResolvedConfig, SizeSpec, ThumbnailConfig};

use crate::command::ThumbnailCommand;
use crate::download::open_remote;
use crate::endpoint::{BoxedWriter, InputEndpoint, OutputEndpoint, PIPE_INPUT};
use crate::error::MediaResult;
use crate::fallback::FallbackFetcher;
use crate::probe::{FfprobeProber, MediaProber};
use crate::process::{ExecutionMode, StdinFeed, ThumbnailStream, TranscoderDuplex, TranscoderRunner};

/// What a thumbnail request produced.
pub enum ThumbnailOutput {
    /// The image was written to the output endpoint.
    Completed,
    /// The image is readable from this stream.
    Stream(ThumbnailStream),
    /// The caller drives the transcoder's stdin and stdout.
    Duplex(TranscoderDuplex),
}

impl ThumbnailOutput {
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Completed => ExecutionMode::Blocking,
            Self::Stream(_) => ExecutionMode::Streaming,
            Self::Duplex(_) => ExecutionMode::Duplex,
        }
    }

    pub fn into_stream(self) -> Option<ThumbnailStream> {
        match self {
            Self::Stream(stream) => Some(stream),
            _ => None,
        }
    }

    pub fn into_duplex(self) -> Option<TranscoderDuplex> {
        match self {
            Self::Duplex(duplex) => Some(duplex),
            _ => None,
        }
    }
}

impl std::fmt::Debug for ThumbnailOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ThumbnailOutput::{:?}", self.mode())
    }
}

/// Generates thumbnails with one resolved configuration.
///
/// Holds no per-request state; a generator can serve any number of
/// concurrent requests.
#[derive(Clone)]
pub struct ThumbnailGenerator {
    config: ResolvedConfig,
    client: Client,
    prober: Arc<dyn MediaProber>,
}

impl ThumbnailGenerator {
    /// Resolve `config` against the process environment.
    pub fn new(config: &ThumbnailConfig) -> Self {
        Self::from_resolved(config.resolve())
    }

    pub fn from_resolved(config: ResolvedConfig) -> Self {
        let prober = Arc::new(FfprobeProber::new(&config.prober));
        Self {
            config,
            client: Client::new(),
            prober,
        }
    }

    /// Replace the metadata prober used by the remote fallback.
    pub fn with_prober(mut self, prober: impl MediaProber + 'static) -> Self {
        self.prober = Arc::new(prober);
        self
    }

    /// Replace the HTTP client used for remote inputs.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Generate a thumbnail from `input` into `output`.
    ///
    /// `size` is parsed unless the config carries a raw argument override.
    pub async fn generate(
        &self,
        input: impl Into<InputEndpoint>,
        output: impl Into<OutputEndpoint>,
        size: &str,
    ) -> MediaResult<ThumbnailOutput> {
        let input = input.into();
        let output = output.into();
        let runner = TranscoderRunner::new(&self.config.transcoder);

        if let Some(args) = &self.config.args {
            if !input.is_null() || !output.is_null() {
                warn!(?input, ?output, "Raw transcoder arguments given; ignoring endpoints");
            }
            return Ok(ThumbnailOutput::Duplex(runner.run_duplex(args)?));
        }

        let size = SizeSpec::parse(size)?;
        let mode = ExecutionMode::select(input.kind(), output.kind(), false)?;
        info!(?mode, ?input, ?output, %size, "Generating thumbnail");

        match mode {
            ExecutionMode::Duplex => {
                let args = self.build_args(input.argument_token(), output.argument_tokens(), size);
                Ok(ThumbnailOutput::Duplex(runner.run_duplex(&args)?))
            }
            ExecutionMode::Streaming => {
                let args = self.build_args(input.argument_token(), output.argument_tokens(), size);
                let feed = self.open_input(input).await?;
                Ok(ThumbnailOutput::Stream(runner.run_streaming(&args, feed).await?))
            }
            ExecutionMode::Blocking => {
                self.generate_blocking(&runner, input, output, size).await?;
                Ok(ThumbnailOutput::Completed)
            }
        }
    }

    async fn generate_blocking(
        &self,
        runner: &TranscoderRunner,
        input: InputEndpoint,
        output: OutputEndpoint,
        size: SizeSpec,
    ) -> MediaResult<()> {
        let output_tokens = output.argument_tokens();
        let mut sink = output.into_writer();

        let result = match input {
            InputEndpoint::Remote(url) => {
                self.generate_remote(runner, &url, &output_tokens, size, &mut sink)
                    .await
            }
            local => {
                let args = self.build_args(local.argument_token(), output_tokens, size);
                let feed = self.open_input(local).await?;
                runner.run_blocking(&args, feed, sink.as_mut()).await
            }
        };

        // Close the caller's writer so it sees end of stream.
        if let Some(mut writer) = sink {
            if let Err(e) = writer.shutdown().await {
                if result.is_ok() {
                    return Err(e.into());
                }
            }
        }

        result
    }

    /// Pipe the remote resource directly; on failure retry once from a partial download.
    async fn generate_remote(
        &self,
        runner: &TranscoderRunner,
        url: &Url,
        output_tokens: &[String],
        size: SizeSpec,
        sink: &mut Option<BoxedWriter>,
    ) -> MediaResult<()> {
        let args = self.build_args(PIPE_INPUT, output_tokens.to_vec(), size);

        // The direct attempt may fail after writing part of an image, so its
        // output is staged and only reaches the caller's writer on success.
        let mut staged: Vec<u8> = Vec::new();
        let direct = match open_remote(&self.client, url).await {
            Ok(feed) => {
                let staging = sink.is_some().then_some(&mut staged);
                runner.run_blocking(&args, Some(feed), staging).await
            }
            Err(e) => Err(e),
        };

        let err = match direct {
            Ok(()) => {
                if let Some(writer) = sink.as_mut() {
                    writer.write_all(&staged).await?;
                }
                return Ok(());
            }
            Err(e) if e.allows_fallback() => e,
            Err(e) => return Err(e),
        };
        warn!(url = %url, error = %err, "Direct remote transcode failed, retrying from partial download");

        let fetcher = FallbackFetcher::new(
            &self.client,
            self.prober.as_ref(),
            self.config.fallback_byte_limit,
        );
        let plan = fetcher.prepare(url).await?;

        let local = plan.path().to_string_lossy().into_owned();
        let args = self.build_args(local, output_tokens.to_vec(), size);
        let result = runner.run_blocking(&args, None, sink.as_mut()).await;

        plan.cleanup();
        result
    }

    async fn open_input(&self, input: InputEndpoint) -> MediaResult<Option<StdinFeed>> {
        match input {
            InputEndpoint::Path(_) | InputEndpoint::Null => Ok(None),
            InputEndpoint::Stream(reader) => Ok(Some(StdinFeed::Reader(reader))),
            InputEndpoint::Remote(url) => open_remote(&self.client, &url).await.map(Some),
        }
    }

    fn build_args(&self, input: impl Into<String>, output: Vec<String>, size: SizeSpec) -> Vec<String> {
        ThumbnailCommand::new(input, output, size, &self.config.seek).build_args()
    }
}

/// Generate a thumbnail with a one-off [`ThumbnailGenerator`].
pub async fn generate_thumbnail(
    input: impl Into<InputEndpoint>,
    output: impl Into<OutputEndpoint>,
    size: &str,
    config: &ThumbnailConfig,
) -> MediaResult<ThumbnailOutput> {
    ThumbnailGenerator::new(config).generate(input, output, size).await
}
