#![deny(unreachable_patterns)]
//! FFmpeg-driven thumbnail engine.
//!
//! This crate provides:
//! - Endpoint classification (local path, stream, remote URL, none)
//! - Single-frame FFmpeg argument building
//! - Blocking, streaming and duplex execution of the transcoder
//! - Partial-download fallback for remote inputs that fail to stream

pub mod command;
pub mod download;
pub mod endpoint;
pub mod error;
pub mod fallback;
pub mod probe;
pub mod process;
pub mod thumbnail;

pub use command::ThumbnailCommand;
pub use endpoint::{BoxedReader, BoxedWriter, EndpointKind, InputEndpoint, OutputEndpoint};
pub use error::{MediaError, MediaResult};
pub use fallback::{estimate_cutoff, FallbackFetcher, FallbackPlan};
pub use probe::{FfprobeProber, MediaMetadata, MediaProber};
pub use process::{ExecutionMode, StdinFeed, ThumbnailStream, TranscoderDuplex, TranscoderRunner};
pub use thumbnail::{generate_thumbnail, ThumbnailGenerator, ThumbnailOutput};

pub use vthumb_models::{SizeSpec, ThumbnailConfig};
