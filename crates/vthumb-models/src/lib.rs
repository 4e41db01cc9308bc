//! Shared data models for vthumb.
//!
//! This crate provides Serde-serializable types for:
//! - Thumbnail size directives and their parser
//! - Per-request configuration and its resolution order

pub mod config;
pub mod size;

// Re-export common types
pub use config::{
    EnvSource, ProcessEnv, ResolvedConfig, ThumbnailConfig, DEFAULT_FALLBACK_BYTE_LIMIT,
    DEFAULT_PROBER, DEFAULT_SEEK, DEFAULT_TRANSCODER,
};
pub use size::{SizeSpec, SizeSpecError};
