//! Transcoder argument builder.

use vthumb_models::SizeSpec;

/// Builder for single-frame thumbnail commands.
///
/// The transcoder is sensitive to argument position, so [`build_args`]
/// always emits the same scaffold: overwrite flag, input, frame count, seek,
/// scale filter, output.
///
/// [`build_args`]: ThumbnailCommand::build_args
#[derive(Debug, Clone)]
pub struct ThumbnailCommand {
    /// Input token (path or `pipe:0`)
    input: String,
    /// Output tokens (path, or format flags followed by `pipe:1`)
    output: Vec<String>,
    /// Size directive
    size: SizeSpec,
    /// Seek offset, passed through as given
    seek: String,
}

impl ThumbnailCommand {
    /// Create a new thumbnail command.
    pub fn new<I, S>(input: impl Into<String>, output: I, size: SizeSpec, seek: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            input: input.into(),
            output: output.into_iter().map(Into::into).collect(),
            size,
            seek: seek.into(),
        }
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(10 + self.output.len());

        // Overwrite flag
        args.push("-y".to_string());

        // Input
        args.push("-i".to_string());
        args.push(self.input.clone());

        // Single frame
        args.push("-vframes".to_string());
        args.push("1".to_string());

        // Seek
        args.push("-ss".to_string());
        args.push(self.seek.clone());

        // Scale
        args.push("-vf".to_string());
        args.push(self.size.scale_filter());

        // Output
        args.extend(self.output.iter().cloned());

        args
    }
}
