/// Unified error types for the ytclip system.
use std::path::PathBuf;
use thiserror::Error;

/// Startup and configuration errors.
#[derive(Debug, Error)]
pub enum YtclipError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Request-level errors, raised before any external process is launched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("YouTube URL required")]
    MissingUrl,

    #[error("Malformed timestamp: {0:?}")]
    MalformedTimestamp(String),

    #[error("End time {end:?} must be after start time {start:?}")]
    EmptyTrimWindow { start: String, end: String },
}

/// Errors from driving an external tool (yt-dlp, ffmpeg).
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} could not be started: {reason}")]
    LaunchFailed { tool: &'static str, reason: String },

    #[error("{tool} failed with {}", exit_description(.code))]
    Failed { tool: &'static str, code: Option<i32> },

    #[error("{tool} timed out after {secs}s")]
    Timeout { tool: &'static str, secs: u64 },
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Job-level failures. Every variant terminates the job in the error state.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("Failed to {action} {}: {source}", .path.display())]
    Filesystem {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Downloaded media not found at {}", .0.display())]
    MissingOutput(PathBuf),

    /// The job's task went away before it reached a terminal state.
    #[error("Download was interrupted before it finished")]
    Interrupted,
}

impl DownloadError {
    pub fn filesystem(action: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DownloadError::Filesystem {
            action,
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for ytclip operations.
pub type YtclipResult<T> = Result<T, YtclipError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failure_message() {
        let err = ToolError::Failed { tool: "yt-dlp", code: Some(1) };
        assert_eq!(err.to_string(), "yt-dlp failed with code 1");

        let err = ToolError::Failed { tool: "ffmpeg", code: None };
        assert_eq!(err.to_string(), "ffmpeg failed with a signal");
    }

    #[test]
    fn test_download_error_wraps_tool() {
        let err: DownloadError = ToolError::Timeout { tool: "ffmpeg", secs: 120 }.into();
        assert_eq!(err.to_string(), "ffmpeg timed out after 120s");
    }

    #[test]
    fn test_filesystem_message_names_path() {
        let err = DownloadError::filesystem(
            "rename",
            "/tmp/temp_1.mp4",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.to_string().contains("rename /tmp/temp_1.mp4"));
    }
}
