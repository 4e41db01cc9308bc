//! vthumb command-line binary.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vthumb_media::{InputEndpoint, OutputEndpoint, ThumbnailGenerator, ThumbnailOutput};
use vthumb_models::ThumbnailConfig;

/// Argument meaning "standard input" or "standard output".
const STDIO: &str = "-";

#[derive(Debug, Parser)]
#[command(name = "vthumb")]
#[command(about = "Generate a still thumbnail from a video with FFmpeg")]
#[command(version)]
struct Cli {
    /// Video path or http(s) URL; `-` reads the video from stdin
    input: String,

    /// Image path; `-` writes a JPEG to stdout
    output: String,

    /// Thumbnail size, e.g. `240x?`, `?x100`, `320x240` or `50%`
    #[arg(short, long, default_value = "150x100")]
    size: String,

    /// Seek offset, formatted as hh:mm:ss[.ms]
    #[arg(long)]
    seek: Option<String>,

    /// FFmpeg executable (defaults to $FFMPEG_PATH, then `ffmpeg`)
    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    /// FFprobe executable (defaults to $FFPROBE_PATH, then `ffprobe`)
    #[arg(long)]
    ffprobe: Option<PathBuf>,

    /// Bytes to download when a remote input must be fetched partially
    #[arg(long)]
    fallback_bytes: Option<u64>,

    /// Raw FFmpeg arguments. stdin and stdout are piped straight through.
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    raw: Option<Vec<String>>,
}

impl Cli {
    fn config(&self) -> ThumbnailConfig {
        ThumbnailConfig {
            path: self.ffmpeg.clone(),
            seek: self.seek.clone(),
            args: self.raw.clone(),
            probe_path: self.ffprobe.clone(),
            fallback_byte_limit: self.fallback_bytes,
        }
    }

    fn input(&self) -> InputEndpoint {
        if self.input == STDIO {
            InputEndpoint::stream(tokio::io::stdin())
        } else {
            InputEndpoint::parse(&self.input)
        }
    }

    fn output(&self) -> OutputEndpoint {
        if self.output == STDIO {
            OutputEndpoint::Null
        } else {
            OutputEndpoint::Path(PathBuf::from(&self.output))
        }
    }
}

fn init_tracing() {
    // stdout may carry image bytes, so logs always go to stderr.
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vthumb=info,warn"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for HTTPS inputs)
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let generator = ThumbnailGenerator::new(&cli.config());
    info!(transcoder = %generator.config().transcoder.display(), "Starting vthumb");

    let (input, output) = if cli.raw.is_some() {
        if cli.input != STDIO || cli.output != STDIO {
            bail!("--raw pipes stdin to stdout; pass `-` for both input and output");
        }
        (InputEndpoint::Null, OutputEndpoint::Null)
    } else {
        (cli.input(), cli.output())
    };

    match generator.generate(input, output, &cli.size).await? {
        ThumbnailOutput::Completed => {
            info!(output = %cli.output, "Thumbnail written");
        }
        ThumbnailOutput::Stream(mut stream) => {
            let mut stdout = tokio::io::stdout();
            let bytes = tokio::io::copy(&mut stream, &mut stdout)
                .await
                .context("failed to write thumbnail to stdout")?;
            stdout.flush().await?;
            stream.finish().await?;
            info!(bytes, "Thumbnail streamed to stdout");
        }
        ThumbnailOutput::Duplex(duplex) => {
            let (mut reader, mut writer) = tokio::io::split(duplex);
            let mut stdin = tokio::io::stdin();
            let mut stdout = tokio::io::stdout();
            let feed = async {
                let fed = tokio::io::copy(&mut stdin, &mut writer).await?;
                writer.shutdown().await?;
                Ok::<_, std::io::Error>(fed)
            };
            let drain = async {
                let drained = tokio::io::copy(&mut reader, &mut stdout).await?;
                stdout.flush().await?;
                Ok::<_, std::io::Error>(drained)
            };
            let (fed, drained) = tokio::try_join!(feed, drain)?;
            info!(fed, drained, "Raw transcoder run finished");

            reader.unsplit(writer).wait().await?;
        }
    }

    Ok(())
}
